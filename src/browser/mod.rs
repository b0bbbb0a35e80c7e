pub mod connection;
pub mod downloads;
pub mod headless;

pub use connection::{configure_downloads, connect_to_browser_and_page, open_browser};
pub use downloads::{rename_download, DirListing, DownloadWatcher, OutputListing};
pub use headless::launch_headless_browser;
