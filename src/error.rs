use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    Resolve,
    SocketOption,
    Connect,
    LocalAddress,
}

impl fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeStage::Resolve => "resolve",
            ProbeStage::SocketOption => "socket_option",
            ProbeStage::Connect => "connect",
            ProbeStage::LocalAddress => "local_address",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("не удалось определить внешний адрес (этап {stage}): {source}")]
    NetworkProbe { stage: ProbeStage, source: io::Error },
    #[error("источник статистики {path} недоступен: {source}")]
    StatSourceUnavailable { path: String, source: io::Error },
    #[error("не удалось разобрать {what}: {reason}")]
    Parse { what: String, reason: String },
    #[error("не удалось открыть каталог блочных устройств {path}: {source}")]
    DirectoryUnavailable { path: String, source: io::Error },
    #[error("не удалось открыть зонд для устройства {device}: {source}")]
    ProbeUnavailable { device: String, source: io::Error },
}

impl TelemetryError {
    pub(crate) fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        TelemetryError::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn stat_source(path: impl Into<String>, source: io::Error) -> Self {
        TelemetryError::StatSourceUnavailable {
            path: path.into(),
            source,
        }
    }
}
