/// エラー分類とリトライ判定ユーティリティ。
use anyhow::Error;
use reqwest::StatusCode;
use sqlx::Error as SqlxError;

use crate::clients::BrowseApiError;
use crate::ratelimit::RateLimitError;

/// エラーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// リトライ可能なエラー（一時的なネットワークエラー、タイムアウト、429/5xxなど）
    Retryable,
    /// リトライ不可能なエラー（バリデーションエラー、日次予算の枯渇など）
    NonRetryable,
    /// 致命的なエラー（認証エラー、設定エラーなど）
    Fatal,
}

/// エラーを分類する。
///
/// 日次レート予算の枯渇は明示的にリトライ不可能として扱います。
/// リトライしても壁に当たるだけなので、呼び出し側は即座に失敗させるべきです。
#[must_use]
pub fn classify_error(error: &Error) -> ErrorKind {
    if error.downcast_ref::<RateLimitError>().is_some() {
        return ErrorKind::NonRetryable;
    }

    if let Some(BrowseApiError::Status { code, .. }) = error.downcast_ref::<BrowseApiError>() {
        if code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS {
            return ErrorKind::Retryable;
        }
        return match *code {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Fatal,
            _ => ErrorKind::NonRetryable,
        };
    }

    if let Some(reqwest_err) = error.downcast_ref::<reqwest::Error>() {
        if reqwest_err.is_timeout() || reqwest_err.is_connect() {
            return ErrorKind::Retryable;
        }

        if let Some(status) = reqwest_err.status() {
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                return ErrorKind::Retryable;
            }
            match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return ErrorKind::Fatal,
                _ if status.is_client_error() => return ErrorKind::NonRetryable,
                _ => {}
            }
        }
    }

    if let Some(sqlx_err) = error.downcast_ref::<SqlxError>() {
        match sqlx_err {
            SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
                return ErrorKind::Retryable;
            }
            SqlxError::RowNotFound => return ErrorKind::NonRetryable,
            SqlxError::Configuration(_) => return ErrorKind::Fatal,
            _ => {}
        }
    }

    ErrorKind::NonRetryable
}

/// エラーがリトライ可能かどうかを判定する。
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    matches!(classify_error(error), ErrorKind::Retryable)
}

/// エラーが致命的かどうかを判定する。
#[must_use]
pub fn is_fatal(error: &Error) -> bool {
    matches!(classify_error(error), ErrorKind::Fatal)
}
