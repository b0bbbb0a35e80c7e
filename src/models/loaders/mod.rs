pub mod cj_loader;
pub mod sheet_loader;

pub use cj_loader::{load_cj_file, load_cj_folder, parse_cj_rows, FileSummary};
pub use sheet_loader::{load_image_items, load_product_items};
