use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// The JSON envelope every operation answers with:
/// `{"ok":true,"output":...}` or `{"ok":false,"error":{...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct Response<T> {
    pub ok:     bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:  Option<RpcError>,
}

impl<T> Response<T> {
    pub fn success(output: T) -> Self {
        Response { ok: true, output: Some(output), error: None }
    }

    pub fn failure(error: RpcError) -> Self {
        Response { ok: false, output: None, error: Some(error) }
    }

    pub fn into_result(self) -> Result<T, RpcError> {
        match (self.ok, self.output, self.error) {
            (true, Some(output), _) => Ok(output),
            (true, None, _) => Err(RpcError::validation("response is missing its output")),
            (false, _, Some(error)) => Err(error),
            (false, _, None) => Err(RpcError::internal("response failed without an error")),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            ok:     self.ok,
            output: self.output.map(f),
            error:  self.error,
        }
    }
}

impl<T> From<Result<T, RpcError>> for Response<T> {
    fn from(result: Result<T, RpcError>) -> Self {
        match result {
            Ok(output) => Response::success(output),
            Err(error) => Response::failure(error),
        }
    }
}
