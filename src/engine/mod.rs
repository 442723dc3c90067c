pub mod extends;
pub mod includes;
