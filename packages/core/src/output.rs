//! JSON rendering for command output.

use serde::Serialize;
use serde_json::json;

use crate::error::AppError;
use crate::services::koios::ApiResponse;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Compact single-line JSON instead of pretty-printed.
    pub no_format: bool,
    /// Wrap the body together with request statistics.
    pub stats: bool,
}

/// Render an API response, optionally inside a `{"stats", "data"}` envelope.
pub fn render_response(
    response: &ApiResponse,
    usage_stamp: Option<u64>,
    options: OutputOptions,
) -> Result<String, AppError> {
    if !options.stats {
        return render(&response.data, options);
    }

    let envelope = json!({
        "stats": {
            "status": response.status,
            "elapsed_ms": response.elapsed.as_millis() as u64,
            "requests_today": usage_stamp,
        },
        "data": response.data,
    });
    render(&envelope, options)
}

pub fn render<T: Serialize>(value: &T, options: OutputOptions) -> Result<String, AppError> {
    let rendered = if options.no_format {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    rendered.map_err(|err| AppError::Parse(err.to_string()))
}
