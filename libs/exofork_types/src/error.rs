// libs/exofork_types/src/error.rs
use core::fmt;

/// Type de résultat des appels système exokernel
pub type Result<T> = core::result::Result<T, ExoError>;

/// Codes d'erreur renvoyés par le noyau (valeurs négatives côté ABI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Erreur non spécifiée
    Unspecified = 1,

    /// Environnement inexistant ou accès refusé
    BadEnv = 2,

    /// Paramètre invalide
    Invalid = 3,

    /// Mémoire physique épuisée
    NoMem = 4,

    /// Plus d'environnement libre
    NoFreeEnv = 5,

    /// Faute mémoire lors d'un accès
    Fault = 6,

    /// Opération non supportée
    NotSupported = 7,
}

impl ErrorCode {
    /// Valeur renvoyée par l'ABI (`-code`)
    pub const fn errno(self) -> i32 {
        -(self as i32)
    }

    /// Décode une valeur de retour négative de l'ABI
    pub fn from_errno(value: i32) -> Option<Self> {
        match value {
            -1 => Some(ErrorCode::Unspecified),
            -2 => Some(ErrorCode::BadEnv),
            -3 => Some(ErrorCode::Invalid),
            -4 => Some(ErrorCode::NoMem),
            -5 => Some(ErrorCode::NoFreeEnv),
            -6 => Some(ErrorCode::Fault),
            -7 => Some(ErrorCode::NotSupported),
            _ => None,
        }
    }
}

/// Erreur renvoyée par le substrat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExoError {
    /// Code d'erreur
    code: ErrorCode,

    /// Message descriptif
    message: Option<&'static str>,

    /// Identifiant optionnel pour le contexte (adresse, envid...)
    context_id: Option<u64>,
}

impl ExoError {
    /// Crée une nouvelle erreur avec un code
    pub const fn new(code: ErrorCode) -> Self {
        ExoError {
            code,
            message: None,
            context_id: None,
        }
    }

    /// Crée une erreur avec un message
    pub const fn with_message(code: ErrorCode, message: &'static str) -> Self {
        ExoError {
            code,
            message: Some(message),
            context_id: None,
        }
    }

    /// Définit un identifiant de contexte
    pub const fn with_context(mut self, id: u64) -> Self {
        self.context_id = Some(id);
        self
    }

    /// Retourne le code d'erreur
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Retourne le message d'erreur
    pub const fn message(&self) -> Option<&'static str> {
        self.message
    }

    pub const fn context_id(&self) -> Option<u64> {
        self.context_id
    }

    /// Convertit un retour brut d'appel système (`< 0` = erreur)
    pub fn check(ret: i32) -> Result<u32> {
        if ret >= 0 {
            return Ok(ret as u32);
        }
        Err(ExoError::new(
            ErrorCode::from_errno(ret).unwrap_or(ErrorCode::Unspecified),
        ))
    }
}

impl fmt::Display for ExoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            ErrorCode::Unspecified => write!(f, "Unspecified error"),
            ErrorCode::BadEnv => write!(f, "Bad environment"),
            ErrorCode::Invalid => write!(f, "Invalid parameter"),
            ErrorCode::NoMem => write!(f, "Out of memory"),
            ErrorCode::NoFreeEnv => write!(f, "Out of environments"),
            ErrorCode::Fault => write!(f, "Segmentation fault"),
            ErrorCode::NotSupported => write!(f, "Operation not supported"),
        }?;

        if let Some(msg) = self.message {
            write!(f, ": {}", msg)?;
        }

        if let Some(id) = self.context_id {
            write!(f, " (context: {:#x})", id)?;
        }

        Ok(())
    }
}

impl From<ErrorCode> for ExoError {
    fn from(code: ErrorCode) -> Self {
        ExoError::new(code)
    }
}
