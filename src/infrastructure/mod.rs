//! 基础设施层：唯一持有浏览器页面的地方

pub mod js_executor;

pub use js_executor::{js_string, JsExecutor, Locator};
