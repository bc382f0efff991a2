// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 日志初始化: stdout 只输出 JSON, 日志一律写 stderr

use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// 日志级别环境变量, 取值同 `RUST_LOG` (trace|debug|info|warn|error|off)
pub const ENV_LOG: &str = "KEYPOINTS_LOG";

pub fn get_subscriber<Sink>(env_filter: &str, sink: Sink) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(env_filter));
    Registry::default().with(filter).with(
        fmt::layer()
            .with_writer(sink)
            .with_target(false)
            .with_ansi(false),
    )
}

/// 安装全局订阅者; 重复安装时保留第一个
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    if set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// 默认 warn 级别, 输出到 stderr
pub fn init() {
    init_subscriber(get_subscriber("warn", std::io::stderr));
}
