//! Loaded token modules.

use std::path::{Path, PathBuf};

use keyward_token::{Loader, Rv, TokenInterface};
use tracing::{debug, error, info, warn};

use crate::error::HsmError;

/// An initialized token interface.
///
/// The module is finalized on [`Module::finalize`] or, failing that, on drop.
pub struct Module {
    token: Box<dyn TokenInterface>,
    path: PathBuf,
    finalized: bool,
}

impl Module {
    /// Loads the driver at `path` and initializes it.
    pub fn load(loader: &dyn Loader, path: impl AsRef<Path>) -> Result<Self, HsmError> {
        let path = path.as_ref();
        let token = loader.load(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Token module could not be loaded");
            HsmError::LoaderFailed {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        Self::initialize(token, path)
    }

    /// Initializes an already loaded token interface.
    ///
    /// A token that reports it is already initialized is accepted with a warning.
    pub fn initialize(
        token: Box<dyn TokenInterface>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, HsmError> {
        let path = path.into();

        match token.initialize() {
            Ok(()) => info!(path = %path.display(), "Token module initialized"),
            Err(Rv::CRYPTOKI_ALREADY_INITIALIZED) => {
                warn!(path = %path.display(), "Token module already initialized");
            },
            Err(rv) => {
                error!(path = %path.display(), %rv, "Token module initialization failed");
                return Err(HsmError::TokenInitFailed(rv));
            },
        }

        Ok(Self {
            token,
            path,
            finalized: false,
        })
    }

    /// Returns the token interface.
    pub fn token(&self) -> &dyn TokenInterface {
        &*self.token
    }

    /// Returns the path the module was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once the module has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Finalizes the token. Calling it again is a no-op.
    pub fn finalize(&mut self) -> Result<(), HsmError> {
        if self.finalized {
            warn!(path = %self.path.display(), "Token module already finalized");
            return Ok(());
        }

        match self.token.finalize() {
            Ok(()) => debug!(path = %self.path.display(), "Token module finalized"),
            Err(Rv::CRYPTOKI_NOT_INITIALIZED) => {
                warn!(path = %self.path.display(), "Token module was not initialized");
            },
            Err(rv) => {
                error!(path = %self.path.display(), %rv, "Token module finalization failed");
                return Err(HsmError::FinalizeFailed(rv));
            },
        }

        self.finalized = true;
        Ok(())
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        if !self.finalized {
            if let Err(e) = self.finalize() {
                warn!(error = %e, "Token module not finalized on drop");
            }
        }
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("finalized", &self.finalized)
            .finish()
    }
}
