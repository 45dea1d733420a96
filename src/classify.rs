//! Pure mapping from transport failure codes to HTTP-like statuses and retry
//! eligibility. No state, no configuration; anything the table does not name
//! falls through to 408/retriable.

use crate::error::TransportErrorCode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub status: u16,
    pub retriable: bool,
}

pub const fn classify(code: TransportErrorCode) -> Classification {
    match code {
        TransportErrorCode::MalformedUrl => Classification {
            status: 400,
            retriable: false,
        },
        TransportErrorCode::BadOption | TransportErrorCode::TooManyRedirects => Classification {
            status: 500,
            retriable: false,
        },
        TransportErrorCode::ConnectFailed => Classification {
            status: 503,
            retriable: true,
        },
        TransportErrorCode::Throttled => Classification {
            status: 429,
            retriable: true,
        },
        TransportErrorCode::TlsFailed => Classification {
            status: 526,
            retriable: true,
        },
        // TimedOut maps here explicitly; everything unrecognized is treated
        // as a timeout-equivalent transient failure.
        TransportErrorCode::TimedOut
        | TransportErrorCode::Interrupted
        | TransportErrorCode::Protocol
        | TransportErrorCode::Io
        | TransportErrorCode::Other => Classification {
            status: 408,
            retriable: true,
        },
    }
}
