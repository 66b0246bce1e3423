// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kind of errors which can occur while jogging.
///
/// None of them is fatal for the jogging loops. They are logged and turned into a halt or
/// into a skipped cycle by the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JogException {
    /// ModelException is returned if the robot model service fails, times out or returns
    /// data with unexpected dimensions.
    #[error("{message:?}")]
    ModelException { message: String },

    /// CommandException is returned if an incoming command is malformed.
    #[error("{message:?}")]
    CommandException { message: String },

    /// JointStateException is returned if the incoming joint state does not describe the
    /// active joint group.
    #[error("{message:?}")]
    JointStateException { message: String },

    /// ConfigException is returned if the parameters cannot be read or are inconsistent.
    #[error("{message:?}")]
    ConfigException { message: String },

    /// RealTimeException is returned if the real-time priority cannot be set
    #[error("{message:?}")]
    RealTimeException { message: String },
}

/// creates a CommandException from anything that can be turned into a String
pub(crate) fn create_command_exception<S: Into<String>>(message: S) -> JogException {
    JogException::CommandException {
        message: message.into(),
    }
}

/// creates a ModelException from anything that can be turned into a String
pub(crate) fn create_model_exception<S: Into<String>>(message: S) -> JogException {
    JogException::ModelException {
        message: message.into(),
    }
}

/// creates a ConfigException from anything that can be turned into a String
pub(crate) fn create_config_exception<S: Into<String>>(message: S) -> JogException {
    JogException::ConfigException {
        message: message.into(),
    }
}

/// Result type which can have JogException as Error
pub type JogResult<T> = Result<T, JogException>;
