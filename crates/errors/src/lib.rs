use thiserror::Error;


/// 测试夹具错误类型定义
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据库连接失败: {message}")]
    Connection {
        message: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("临时数据库 {database} 准备失败: {message}")]
    Provisioning { database: String, message: String },
    #[error("迁移锁错误: {0}")]
    Lock(String),
    #[error("写入 {entity} 失败: {source}")]
    Insertion {
        entity: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("迁移失败 (path: {path}, direction: {direction}): {message}")]
    Migration {
        path: String,
        direction: String,
        message: String,
    },
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("归档错误: {0}")]
    Archive(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn connection<S: Into<String>>(msg: S, source: sqlx::Error) -> Self {
        Self::Connection {
            message: msg.into(),
            source,
        }
    }
    pub fn provisioning<D: Into<String>, S: Into<String>>(database: D, msg: S) -> Self {
        Self::Provisioning {
            database: database.into(),
            message: msg.into(),
        }
    }
    pub fn lock<S: Into<String>>(msg: S) -> Self {
        Self::Lock(msg.into())
    }
    pub fn insertion(entity: &'static str, source: sqlx::Error) -> Self {
        Self::Insertion { entity, source }
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn archive<S: Into<String>>(msg: S) -> Self {
        Self::Archive(msg.into())
    }

    /// Errors after which the test process should not keep going.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::Lock(_) | HarnessError::Configuration(_)
        )
    }

    /// Whether the database rejected a row because a referenced row is missing.
    pub fn is_foreign_key_violation(&self) -> bool {
        let source = match self {
            HarnessError::Insertion { source, .. } => source,
            HarnessError::Database(source) => source,
            _ => return false,
        };
        match source {
            sqlx::Error::Database(db) => db.code().as_deref() == Some("23503"),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::Serialization(err.to_string())
    }
}
