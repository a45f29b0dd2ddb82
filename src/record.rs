use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Record {
    pub cwd: String, // Working directory when the command finished
    #[serde(rename = "last_cmd")]
    pub last_command: String, // Verbatim command line
    pub exit_code: i32, // Exit status as the shell saw it
    #[serde(rename = "stderr")]
    pub error_tail: String, // Lossy UTF-8, at most MAX_ERROR_TAIL_BYTES
}
