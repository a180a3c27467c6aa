//! nginx 소스 에러 타입
//!
//! [`NginxSourceError`]는 소스 설정, 디코더 초기화, 팔로워 프로세스 실행에서
//! 발생하는 에러를 표현합니다. `From<NginxSourceError> for RatewardenError`
//! 변환으로 상위 레이어에서 `?`로 전파할 수 있습니다.

use ratewarden_core::error::{ConfigError, PipelineError, RatewardenError};

/// nginx 소스 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum NginxSourceError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 팔로워 프로세스를 시작할 수 없음
    #[error("failed to spawn follower '{program}': {source}")]
    Spawn {
        /// 실행하려던 프로그램
        program: String,
        /// 원인
        #[source]
        source: std::io::Error,
    },

    /// 팔로워 출력 스트림을 얻지 못함
    #[error("follower '{program}' has no {stream} pipe")]
    MissingPipe {
        /// 실행한 프로그램
        program: String,
        /// 스트림 이름 (stdout, stderr)
        stream: &'static str,
    },

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl NginxSourceError {
    /// 설정 에러를 생성합니다.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<NginxSourceError> for RatewardenError {
    fn from(err: NginxSourceError) -> Self {
        match err {
            NginxSourceError::Config { field, reason } => {
                RatewardenError::Config(ConfigError::InvalidValue { field, reason })
            }
            other => RatewardenError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_error_display_names_program() {
        let err = NginxSourceError::Spawn {
            program: "tail".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let msg = err.to_string();
        assert!(msg.contains("tail"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn config_error_maps_to_config_variant() {
        let err: RatewardenError = NginxSourceError::config("cache_ttl_seconds", "must be > 0").into();
        assert!(matches!(
            err,
            RatewardenError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn runtime_error_maps_to_pipeline_variant() {
        let err: RatewardenError = NginxSourceError::MissingPipe {
            program: "tail".to_owned(),
            stream: "stdout",
        }
        .into();
        assert!(matches!(err, RatewardenError::Pipeline(_)));
    }
}
