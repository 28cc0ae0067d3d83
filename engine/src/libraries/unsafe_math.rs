use crate::libraries::big_num::U256;

pub trait UnsafeMathTrait {
    /// Returns ceil (x / y). Division by 0 panics and must be checked
    /// externally.
    fn div_rounding_up(x: Self, y: Self) -> Self;
}

impl UnsafeMathTrait for u128 {
    fn div_rounding_up(x: Self, y: Self) -> Self {
        x / y + ((x % y > 0) as u128)
    }
}

impl UnsafeMathTrait for U256 {
    fn div_rounding_up(x: Self, y: Self) -> Self {
        x / y + U256::from((x % y > U256::default()) as u8)
    }
}
