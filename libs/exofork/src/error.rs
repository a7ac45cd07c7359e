// libs/exofork/src/error.rs
use core::fmt;

use exofork_types::{ErrorCode, ExoError, Pte, VirtAddr};

/// Catégorie d'une erreur de fork ou de résolution de faute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Accès illégal : la faute n'est pas une écriture sur une page COW
    IllegalAccess,
    /// Mémoire physique épuisée
    ResourceExhaustion,
    /// Appel système refusé par le substrat
    SubstrateRejection,
}

/// Erreur du moteur COW.
///
/// Aucune de ces erreurs n'est récupérable localement : l'appelant de
/// `fork()` reçoit un code négatif, et une faute non résolue termine le
/// processus fautif.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    /// Faute en lecture sur une page gérée par le handler
    ReadFault { va: VirtAddr },
    /// Écriture sur une page en lecture seule non marquée COW
    NotCopyOnWrite { va: VirtAddr, pte: Pte },
    /// Adresse hors de l'espace utilisateur dupliquable
    AboveUtop { va: VirtAddr },
    /// Un appel système a échoué
    Syscall { call: &'static str, err: ExoError },
    /// `ThisEnv` lu avant son initialisation
    IdentityUninitialized,
    /// Opération non implémentée (`sfork`)
    NotSupported,
}

pub type ForkResult<T> = Result<T, ForkError>;

impl ForkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForkError::ReadFault { .. } | ForkError::NotCopyOnWrite { .. } => {
                ErrorKind::IllegalAccess
            }
            ForkError::Syscall { err, .. } if err.code() == ErrorCode::NoMem => {
                ErrorKind::ResourceExhaustion
            }
            _ => ErrorKind::SubstrateRejection,
        }
    }

    /// Code négatif renvoyé par `fork_raw()`
    pub fn errno(&self) -> i32 {
        match self {
            ForkError::ReadFault { .. } | ForkError::NotCopyOnWrite { .. } => {
                ErrorCode::Fault.errno()
            }
            ForkError::AboveUtop { .. } => ErrorCode::Invalid.errno(),
            ForkError::Syscall { err, .. } => err.code().errno(),
            ForkError::IdentityUninitialized => ErrorCode::BadEnv.errno(),
            ForkError::NotSupported => ErrorCode::NotSupported.errno(),
        }
    }

    /// Adapte une erreur du substrat en nommant l'appel fautif
    pub(crate) fn syscall(call: &'static str) -> impl FnOnce(ExoError) -> ForkError {
        move |err| ForkError::Syscall { call, err }
    }
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForkError::ReadFault { va } => write!(f, "read fault at {}", va),
            ForkError::NotCopyOnWrite { va, pte } => {
                write!(f, "write to non copy-on-write page at {} (pte {})", va, pte)
            }
            ForkError::AboveUtop { va } => write!(f, "cannot duplicate kernel page {}", va),
            ForkError::Syscall { call, err } => write!(f, "{} failed: {}", call, err),
            ForkError::IdentityUninitialized => write!(f, "thisenv read before initialization"),
            ForkError::NotSupported => write!(f, "operation not supported"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind() {
        let oom = ForkError::Syscall {
            call: "page_alloc",
            err: ExoError::new(ErrorCode::NoMem),
        };
        assert_eq!(oom.kind(), ErrorKind::ResourceExhaustion);
        assert_eq!(oom.errno(), -4);

        let bad = ForkError::Syscall {
            call: "page_map",
            err: ExoError::new(ErrorCode::Invalid),
        };
        assert_eq!(bad.kind(), ErrorKind::SubstrateRejection);

        let read = ForkError::ReadFault { va: VirtAddr::new(0x1000) };
        assert_eq!(read.kind(), ErrorKind::IllegalAccess);
    }

    #[test]
    fn test_display() {
        let err = ForkError::Syscall {
            call: "exofork",
            err: ExoError::new(ErrorCode::NoFreeEnv),
        };
        assert_eq!(format!("{}", err), "exofork failed: Out of environments");
    }
}
