//! Protocol middlewares.
//!
//! | Stage               | Continues when                        | Terminal when                |
//! |---------------------|---------------------------------------|------------------------------|
//! | `AccessLog`         | always (logs after `next`)            | never                        |
//! | `ErrorTranslation`  | always (renders, then re-raises)      | never                        |
//! | `Cors`              | not a preflight                       | preflight (`End`)            |
//! | `WebSocketUpgrade`  | not an upgrade / unknown path         | upgrade accepted or rejected |
//! | `StaticFiles`       | not GET/HEAD / no such file           | file served                  |
//! | `ApiDispatch`       | unknown controller, action, endpoint  | call dispatched              |

pub mod access_log;
pub mod api;
pub mod cors;
pub mod error_pages;
pub mod mime;
pub mod range;
pub mod static_files;
pub mod upgrade;

pub use access_log::AccessLog;
pub use api::{Actions, ApiCall, ApiController, ApiDispatch, ApiResult};
pub use cors::Cors;
pub use error_pages::ErrorTranslation;
pub use mime::MimeTable;
pub use range::{parse_range, ByteRange, RangeError};
pub use static_files::StaticFiles;
pub use upgrade::WebSocketUpgrade;
