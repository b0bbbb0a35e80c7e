pub mod loaders;
pub mod product;
pub mod work_item;

pub use product::{CjProduct, ProductRecord};
pub use work_item::WorkItem;
