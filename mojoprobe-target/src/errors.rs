//! エラーメッセージ定数

/// ライフサイクルが既に初期化されている場合のエラーメッセージ
pub const ERR_LIFECYCLE_ACTIVE: &str = "Debugger backend is already initialized in this process";

/// ホストが既に破棄されている場合のエラーメッセージ
pub const ERR_HOST_GONE: &str = "Debugger host has been destroyed";

/// プロセスが既に破棄されている場合のエラーメッセージ
pub const ERR_PROCESS_GONE: &str = "Process has been destroyed";

/// lldb との接続が切れた場合のエラーメッセージ
pub const ERR_CONNECTION_CLOSED: &str = "lldb connection closed";

/// 応答待ちがタイムアウトした場合のエラーメッセージ
pub const ERR_RESPONSE_TIMEOUT: &str = "Timed out waiting for lldb prompt";
