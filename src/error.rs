use broker_protocol::status_codes;

/// The closed set of errors the broker ever needs to report to a client, plus
/// the one internal variant for a failing `DocumentStore` call. Every
/// client-visible variant carries one of the four frozen wire status codes.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid JSON or missing fields: {0}")]
    BadRequest(String),
    #[error("invalid subscribe message")]
    InvalidSubscribeMessage,
    #[error("event not found")]
    EventNotFound,
    #[error("invalid action")]
    InvalidAction,
    #[error("document store error: {0}")]
    Store(String),
}

impl BrokerError {
    /// The wire `status_code`. `Store` is never sent verbatim -- callers fold
    /// it into a `BadRequest`-shaped envelope per the downstream-error policy.
    pub fn status_code(&self) -> u32 {
        match self {
            BrokerError::BadRequest(_) | BrokerError::Store(_) => status_codes::BAD_REQUEST,
            BrokerError::InvalidSubscribeMessage => status_codes::INVALID_SUBSCRIBE_MESSAGE,
            BrokerError::EventNotFound => status_codes::EVENT_NOT_FOUND,
            BrokerError::InvalidAction => status_codes::INVALID_ACTION,
        }
    }

    pub fn message(&self) -> String {
        match self {
            BrokerError::BadRequest(msg) => msg.clone(),
            BrokerError::InvalidSubscribeMessage => "Invalid Subscribe Message".to_owned(),
            BrokerError::EventNotFound => {
                "Event Not Found. Please ensure that event is already registered".to_owned()
            }
            BrokerError::InvalidAction => "Invalid Action".to_owned(),
            BrokerError::Store(msg) => msg.clone(),
        }
    }

    pub fn to_outbound(&self) -> broker_protocol::OutboundMessage {
        broker_protocol::OutboundMessage::error(self.status_code(), self.message())
    }
}
