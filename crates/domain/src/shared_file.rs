use serde::{Deserialize, Serialize};

/// 共享目录中的一个条目，通过不透明的 `fileCode` 对外引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedFile {
    pub file_code: String,
    pub file_name: String,
    pub path: String,
    pub is_dir: bool,
    pub file_size: i64,
}
