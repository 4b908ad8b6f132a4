// 错误码与内部错误类型
use thiserror::Error;

/// 数值错误码，与既有接口完整保持一致（二进制兼容，勿增删改值）
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    #[error("成功")]
    Success = 0,
    #[error("失败")]
    Failed = 1,
    #[error("已经初始化")]
    AlreadyInit = 9101,
    #[error("SDK未初始化")]
    SdkNotInit = 9102,
    #[error("任务已存在")]
    TaskAlreadyExist = 9103,
    #[error("任务不存在")]
    TaskNotExist = 9104,
    #[error("任务已停止")]
    TaskAlreadyStopped = 9105,
    #[error("任务已在运行")]
    TaskAlreadyRunning = 9106,
    #[error("任务未启动")]
    TaskNotStart = 9107,
    #[error("任务仍在运行")]
    TaskStillRunning = 9108,
    #[error("文件已存在")]
    FileExisted = 9109,
    #[error("磁盘已满")]
    DiskFull = 9110,
    #[error("任务过多")]
    TooMuchTask = 9111,
    #[error("参数错误")]
    ParamError = 9112,
    #[error("不支持的模式")]
    SchemaNotSupport = 9113,
    #[error("动态参数设置失败")]
    DynamicParamFail = 9114,
    #[error("继续时没有名称")]
    ContinueNoName = 9115,
    #[error("应用名和应用密钥错误")]
    AppnameAppkeyError = 9116,
    #[error("创建线程错误")]
    CreateThreadError = 9117,
    #[error("任务已完成")]
    TaskFinish = 9118,
    #[error("任务未运行")]
    TaskNotRunning = 9119,
    #[error("任务未空闲")]
    TaskNotIdle = 9120,
    #[error("不支持的任务类型")]
    TaskTypeNotSupport = 9121,
    #[error("添加资源错误")]
    AddResourceError = 9122,
    #[error("不支持的功能")]
    FunctionNotSupport = 9123,
    #[error("已经有文件名")]
    AlreadyHasFilename = 9124,
    #[error("文件名过长")]
    FileNameTooLong = 9125,
    #[error("路径层级名称过长")]
    OnePathLevelNameTooLong = 9126,
    #[error("完整路径名称过长")]
    FullPathNameTooLong = 9127,
    #[error("完整路径名称已被占用")]
    FullPathNameOccupied = 9128,
    #[error("任务没有文件名")]
    TaskNoFileName = 9129,
    #[error("不是Wi-Fi模式")]
    NotWifiMode = 9130,
    #[error("速度限制过小")]
    SpeedLimitTooSmall = 9131,
    #[error("任务控制策略错误")]
    TaskControlStrategy = 9501,
    #[error("URL过长")]
    UrlIsTooLong = 9502,
    #[error("删除文件失败")]
    FileDeleteFail = 9503,
    #[error("文件不存在")]
    FileNotExist = 9504,
    #[error("不支持的信息名称")]
    InfoNameNotSupport = 9505,
    #[error("内存太小")]
    MemoryTooSmall = 9601,
    #[error("验证令牌失败")]
    AuthTokenVerifyFailed = 9602,
    #[error("验证范围失败")]
    AuthScopeVerifyFailed = 9603,
    #[error("验证会话ID失败")]
    AuthSessionIdVerifyFailed = 9604,
    #[error("会话ID已过期")]
    AuthSessionIdExpired = 9605,
    #[error("资源没有配额")]
    AuthResHasNoQuota = 9606,
    #[error("磁盘空间不足")]
    InsufficientDiskSpace = 111_085,
    #[error("打开文件错误")]
    OpenFileErr = 111_128,
    #[error("没有数据管道")]
    NoDataPipe = 111_136,
    #[error("限制")]
    Restriction = 111_151,
    #[error("账户异常")]
    AccountException = 111_152,
    #[error("限制区域")]
    RestrictionArea = 111_153,
    #[error("版权阻止")]
    CopyrightBlocking = 111_154,
    #[error("类型2阻止")]
    Type2Blocking = 111_155,
    #[error("类型3阻止")]
    Type3Blocking = 111_156,
    #[error("长时间没有接收数据")]
    LongTimeNoRecvData = 111_176,
    #[error("超时")]
    TimeOut = 119_212,
    #[error("任务状态错误")]
    TaskStatusErr = 999_999,
}

impl ErrorCode {
    /// 数值形式，供需要原始错误码的调用方使用
    #[must_use]
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// 下载器内部错误类型
///
/// 工作线程不会向外传播这些错误；作业内的任何失败都会被捕获并反映为
/// 对应任务的 `Failed` 状态加一条日志。
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL解析错误: {0}")]
    Url(#[from] url::ParseError),

    #[error("服务器返回错误状态: {0}")]
    ServerStatus(u16),

    #[error("无法获取文件大小")]
    ProbeFailed,

    #[error("分片下载不完整: 预期{expected}字节，实际{actual}字节")]
    ShortChunk { expected: u64, actual: u64 },

    #[error("MD5校验失败，文件可能损坏")]
    HashMismatch,
}

/// 下载结果类型
pub type DownloadResult<T> = Result<T, DownloadError>;
