pub mod order_sheet;
pub mod recipient;
