// アプリケーション全体で共有される共通機能
//
// 設定、エラー型、リレー全体で使用される共有型を含む

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, RelayError, Result};
