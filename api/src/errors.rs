//! An error from Gantry

/// An error from Gantry
#[derive(Debug)]
pub enum Error {
    /// A generic error with a message
    Generic(String),
    /// An error from loading a config
    Config(config::ConfigError),
    /// An error from converting a value with serde
    Serde(serde_json::Error),
    /// An error from converting a value with serde to/from YAML
    SerdeYaml(serde_yaml::Error),
    /// An IO Error
    IO(std::io::Error),
    /// An error from sending a kanal message
    KanalSend(kanal::SendError),
    /// An error from receiving a kanal message
    KanalRecv(kanal::ReceiveError),
    /// An error from joining a tokio task
    Join(tokio::task::JoinError),
    /// A reply channel was dropped before an answer was sent
    ReplyDropped(tokio::sync::oneshot::error::RecvError),
}

impl Error {
    /// Create a new generic error
    ///
    /// # Arguments
    ///
    /// * `msg` - The error message to set
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Get the message from this error if one exists
    pub fn msg(&self) -> Option<String> {
        // get the message from any error types that have one
        match self {
            Error::Generic(msg) => Some(msg.clone()),
            Error::Config(err) => Some(err.to_string()),
            Error::Serde(err) => Some(err.to_string()),
            Error::SerdeYaml(err) => Some(err.to_string()),
            Error::IO(err) => Some(err.to_string()),
            Error::KanalSend(err) => Some(err.to_string()),
            Error::KanalRecv(err) => Some(err.to_string()),
            Error::Join(err) => Some(err.to_string()),
            Error::ReplyDropped(err) => Some(err.to_string()),
        }
    }
}

impl std::fmt::Display for Error {
    /// Cleanly print an error from Gantry
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Generic(msg) => write!(f, "{msg}"),
            Error::Config(err) => write!(f, "Config error: {err}"),
            Error::Serde(err) => write!(f, "Serde error: {err}"),
            Error::SerdeYaml(err) => write!(f, "Serde YAML error: {err}"),
            Error::IO(err) => write!(f, "IO error: {err}"),
            Error::KanalSend(err) => write!(f, "Channel send error: {err}"),
            Error::KanalRecv(err) => write!(f, "Channel receive error: {err}"),
            Error::Join(err) => write!(f, "Task join error: {err}"),
            Error::ReplyDropped(err) => write!(f, "Reply channel dropped: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::SerdeYaml(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}

impl From<kanal::SendError> for Error {
    fn from(error: kanal::SendError) -> Self {
        Error::KanalSend(error)
    }
}

impl From<kanal::ReceiveError> for Error {
    fn from(error: kanal::ReceiveError) -> Self {
        Error::KanalRecv(error)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Error::Join(error)
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(error: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ReplyDropped(error)
    }
}

/// An error from casting a raw string to an enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEnum(pub String);

impl std::fmt::Display for InvalidEnum {
    /// Cleanly print an invalid enum error
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for InvalidEnum {}

impl From<InvalidEnum> for Error {
    fn from(error: InvalidEnum) -> Self {
        Error::Generic(error.0)
    }
}
