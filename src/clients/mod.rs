pub mod cj_client;
pub mod sheets_client;

pub use cj_client::{CjClient, CjResponse};
pub use sheets_client::GoogleSheetsClient;
