//! ipset 싱크 에러 타입
//!
//! [`IpsetSinkError`]는 싱크 설정, 집합 패밀리 감지, 외부 명령 실행에서
//! 발생하는 에러를 표현합니다. `From<IpsetSinkError> for RatewardenError`
//! 변환으로 상위 레이어에서 `?`로 전파할 수 있습니다.

use ratewarden_core::error::{ConfigError, PipelineError, RatewardenError};

/// ipset 싱크 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum IpsetSinkError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 빈 명령 벡터
    #[error("empty command line")]
    EmptyCommand,

    /// 명령을 실행할 수 없음
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// 실행하려던 프로그램
        program: String,
        /// 원인
        #[source]
        source: std::io::Error,
    },

    /// 명령이 제한 시간 안에 끝나지 않음 (강제 종료됨)
    #[error("command timed out after {timeout_ms}ms: {argv}")]
    Timeout {
        /// 공백으로 이어 붙인 명령
        argv: String,
        /// 제한 시간
        timeout_ms: u64,
    },

    /// 명령이 0이 아닌 코드로 종료
    #[error("command exited with {code}: {argv}: {stderr}")]
    NonZeroExit {
        /// 공백으로 이어 붙인 명령
        argv: String,
        /// 종료 코드 (시그널 종료 시 "signal")
        code: String,
        /// 표준 출력
        stdout: String,
        /// 표준 에러
        stderr: String,
    },

    /// `ipset list` 출력 파싱 실패
    #[error("failed to parse ipset list output: {0}")]
    ListParse(String),

    /// 집합 패밀리 감지 실패
    #[error("failed to detect family of ipset '{set}': {reason}")]
    Detection {
        /// 대상 집합 이름
        set: String,
        /// 실패 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IpsetSinkError {
    /// 설정 에러를 생성합니다.
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<IpsetSinkError> for RatewardenError {
    fn from(err: IpsetSinkError) -> Self {
        match err {
            IpsetSinkError::Config { field, reason } => {
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
    fn non_zero_exit_display_includes_argv_and_stderr() {
        let err = IpsetSinkError::NonZeroExit {
            argv: "ipset -exist add blocked 10.0.0.5".to_owned(),
            code: "1".to_owned(),
            stdout: String::new(),
            stderr: "The set with the given name does not exist".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exited with 1"));
        assert!(msg.contains("ipset -exist add blocked"));
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn config_error_maps_to_invalid_value() {
        let err: RatewardenError = IpsetSinkError::config("ipset_name", "must not be empty").into();
        assert!(matches!(
            err,
            RatewardenError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "ipset_name"
        ));
    }

    #[test]
    fn detection_error_maps_to_init_failed() {
        let err: RatewardenError = IpsetSinkError::Detection {
            set: "blocked".to_owned(),
            reason: "unknown family 'bridge'".to_owned(),
        }
        .into();
        assert!(matches!(err, RatewardenError::Pipeline(PipelineError::InitFailed(_))));
        assert!(err.to_string().contains("blocked"));
    }
}
