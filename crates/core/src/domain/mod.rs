pub mod approval;
pub mod delivery;
pub mod line_item;
pub mod quotation;
pub mod rejection;
pub mod version;
