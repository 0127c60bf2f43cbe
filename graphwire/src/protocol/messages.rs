//! Protocol message tags and client request construction (§3, §4.C).

use indexmap::IndexMap;

use crate::packstream::{Structure, Value};

/// Structure tags for every message kind named in §3.
pub mod tag {
    pub const HELLO: u8 = 0x01;
    pub const GOODBYE: u8 = 0x02;
    pub const LOGON: u8 = 0x6A;
    pub const LOGOFF: u8 = 0x6B;
    pub const RESET: u8 = 0x0F;
    pub const RUN: u8 = 0x10;
    pub const BEGIN: u8 = 0x11;
    pub const COMMIT: u8 = 0x12;
    pub const ROLLBACK: u8 = 0x13;
    pub const DISCARD: u8 = 0x2F;
    pub const PULL: u8 = 0x3F;
    pub const ROUTE: u8 = 0x66;
    pub const TELEMETRY: u8 = 0x54;

    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;
}

/// A client request about to be sent: its message tag plus the field list that makes up its
/// structure body. Kept as data (rather than one method per kind) so `Connection::send` has a
/// single pipelining-friendly encode path.
#[derive(Debug, Clone)]
pub struct Request {
    pub tag: u8,
    pub fields: Vec<Value>,
}

impl Request {
    pub fn into_value(self) -> Value {
        Value::Structure(Structure::new(self.tag, self.fields))
    }
}

/// Builders for each request kind in §4.C, each returning the field list in wire order.
pub struct RequestBody;

impl RequestBody {
    pub fn hello(extra: IndexMap<String, Value>) -> Request {
        Request {
            tag: tag::HELLO,
            fields: vec![Value::Map(extra)],
        }
    }

    pub fn logon(auth: IndexMap<String, Value>) -> Request {
        Request {
            tag: tag::LOGON,
            fields: vec![Value::Map(auth)],
        }
    }

    pub fn logoff() -> Request {
        Request {
            tag: tag::LOGOFF,
            fields: vec![],
        }
    }

    pub fn goodbye() -> Request {
        Request {
            tag: tag::GOODBYE,
            fields: vec![],
        }
    }

    pub fn reset() -> Request {
        Request {
            tag: tag::RESET,
            fields: vec![],
        }
    }

    pub fn run(query: &str, parameters: IndexMap<String, Value>, extra: IndexMap<String, Value>) -> Request {
        Request {
            tag: tag::RUN,
            fields: vec![Value::String(query.to_string()), Value::Map(parameters), Value::Map(extra)],
        }
    }

    pub fn pull(extra: IndexMap<String, Value>) -> Request {
        Request {
            tag: tag::PULL,
            fields: vec![Value::Map(extra)],
        }
    }

    pub fn discard(extra: IndexMap<String, Value>) -> Request {
        Request {
            tag: tag::DISCARD,
            fields: vec![Value::Map(extra)],
        }
    }

    pub fn begin(extra: IndexMap<String, Value>) -> Request {
        Request {
            tag: tag::BEGIN,
            fields: vec![Value::Map(extra)],
        }
    }

    pub fn commit() -> Request {
        Request {
            tag: tag::COMMIT,
            fields: vec![],
        }
    }

    pub fn rollback() -> Request {
        Request {
            tag: tag::ROLLBACK,
            fields: vec![],
        }
    }

    pub fn route(routing_ctx: IndexMap<String, Value>, bookmarks: Vec<String>, db_ctx: IndexMap<String, Value>) -> Request {
        Request {
            tag: tag::ROUTE,
            fields: vec![
                Value::Map(routing_ctx),
                Value::List(bookmarks.into_iter().map(Value::String).collect()),
                Value::Map(db_ctx),
            ],
        }
    }

    pub fn telemetry(api_enum: i64) -> Request {
        Request {
            tag: tag::TELEMETRY,
            fields: vec![Value::Int(api_enum)],
        }
    }
}
