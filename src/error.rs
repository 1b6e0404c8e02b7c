use thiserror::Error;

/// 模板引擎的错误类型。
///
/// 引擎遵循"不向外抛出"的策略：结构性解析错误、渲染期查找失败、宿主函数
/// 异常等都走日志通道并尽力继续；只有下列场景以错误值返回调用方。
#[derive(Error, Debug)]
pub enum TplError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("invalid tag delimiters: {0}")]
    InvalidTags(String),
    #[error("host function error: {0}")]
    HostCall(String),
}
