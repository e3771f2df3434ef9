use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("无效的隐藏字幕通道: {0}")]
    InvalidChannel(usize),

    #[error("设备创建失败: {0}")]
    AllocationFailed(#[from] anyhow::Error),

    #[error("等待已取消（会话已销毁）")]
    Cancelled,

    #[error("{0} 已销毁")]
    Destroyed(&'static str),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
