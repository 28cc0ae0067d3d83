///! 256 and 512 bit unsigned integers for phantom-overflow-free intermediates
use uint::construct_uint;

construct_uint! {
    pub struct U256(4);
}

construct_uint! {
    pub struct U512(8);
}
