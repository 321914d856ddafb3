use crate::runtime::value::Filesystem;
use serde::Serialize;

/// A build-plan request handed to the external engine. `generate` returns a
/// `Parallel` over one request per target; `Sequence` carries pipeline
/// stages that must run in order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "request", rename_all = "camelCase")]
pub enum Request {
    Solve { definition: Filesystem },
    Sequence { requests: Vec<Request> },
    Parallel { requests: Vec<Request> },
}

impl Request {
    pub fn parallel(requests: Vec<Request>) -> Request {
        Request::Parallel { requests }
    }

    pub fn sequence(requests: Vec<Request>) -> Request {
        Request::Sequence { requests }
    }

    pub fn solve(definition: Filesystem) -> Request {
        Request::Solve { definition }
    }

    /// The serialized definition of the request, used by `manifest` and by
    /// callers that persist plans.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::FsOp;

    #[test]
    fn serializes_nested_requests() {
        let fs = Filesystem::new().push(FsOp::Scratch);
        let request = Request::parallel(vec![Request::solve(fs)]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["request"], "parallel");
        assert_eq!(json["requests"][0]["request"], "solve");
        assert_eq!(json["requests"][0]["definition"][0]["op"], "scratch");
    }
}
