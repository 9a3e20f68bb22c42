//! Backend selection and kernel availability.
//!
//! Provides:
//! - [`Backend`]: compute backends this build can run on
//! - [`KernelOp`]: operations a backend must implement for the decoder
//! - [`KernelMatrix`]: which ops each backend supports
//! - [`BackendSelector`]: picks and validates the active backend at startup

use std::collections::HashMap;
use std::fmt;

/// Compute backend for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Pure-Rust reference kernels from `llama-models`.
    Cpu,
}

impl Backend {
    /// All backends compiled into this build.
    pub fn compiled() -> &'static [Backend] {
        &[Backend::Cpu]
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Cpu => write!(f, "cpu"),
        }
    }
}

/// Operations a backend must provide to run the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelOp {
    RmsNorm,
    Rope,
    /// Causal attention over the KV cache.
    Attention,
    MlpSwiGlu,
    Embedding,
    /// Output projection to vocabulary logits.
    Projection,
}

impl KernelOp {
    pub fn all() -> &'static [KernelOp] {
        &[
            KernelOp::RmsNorm,
            KernelOp::Rope,
            KernelOp::Attention,
            KernelOp::MlpSwiGlu,
            KernelOp::Embedding,
            KernelOp::Projection,
        ]
    }
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelOp::RmsNorm => write!(f, "rms_norm"),
            KernelOp::Rope => write!(f, "rope"),
            KernelOp::Attention => write!(f, "attention"),
            KernelOp::MlpSwiGlu => write!(f, "mlp_swiglu"),
            KernelOp::Embedding => write!(f, "embedding"),
            KernelOp::Projection => write!(f, "projection"),
        }
    }
}

/// Errors from backend selection and validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("no usable backend compiled into this build")]
    NoBackendsCompiled,
    #[error("backend {backend} missing support for: {}", missing.iter().map(|o| o.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedOps {
        backend: Backend,
        missing: Vec<KernelOp>,
    },
}

/// Kernel availability matrix: (backend, op) → supported.
#[derive(Debug, Clone, Default)]
pub struct KernelMatrix {
    support: HashMap<(Backend, KernelOp), bool>,
}

impl KernelMatrix {
    /// Probe every compiled backend. The CPU kernels cover every op.
    pub fn probe() -> Self {
        let mut support = HashMap::new();
        for &backend in Backend::compiled() {
            for &op in KernelOp::all() {
                let supported = match backend {
                    Backend::Cpu => true,
                };
                support.insert((backend, op), supported);
            }
        }
        Self { support }
    }

    /// Matrix with nothing supported.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Mark `op` as unavailable on `backend`.
    pub fn disable(&mut self, backend: Backend, op: KernelOp) {
        self.support.insert((backend, op), false);
    }

    pub fn supports(&self, backend: Backend, op: KernelOp) -> bool {
        self.support.get(&(backend, op)).copied().unwrap_or(false)
    }

    /// Check that `backend` supports every op, listing the ones it lacks.
    pub fn validate(&self, backend: Backend) -> Result<(), BackendError> {
        let missing: Vec<KernelOp> = KernelOp::all()
            .iter()
            .filter(|&&op| !self.supports(backend, op))
            .copied()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BackendError::UnsupportedOps { backend, missing })
        }
    }

    pub fn supported_ops(&self, backend: Backend) -> Vec<KernelOp> {
        KernelOp::all()
            .iter()
            .filter(|&&op| self.supports(backend, op))
            .copied()
            .collect()
    }
}

/// The active backend together with the matrix it was validated against.
#[derive(Debug, Clone)]
pub struct BackendSelector {
    active: Backend,
    matrix: KernelMatrix,
}

impl BackendSelector {
    /// Select from an already-probed matrix.
    pub fn from_matrix(matrix: KernelMatrix) -> Result<Self, BackendError> {
        let active = Backend::compiled()
            .iter()
            .copied()
            .find(|&b| matrix.validate(b).is_ok());

        match active {
            Some(active) => Ok(Self { active, matrix }),
            None => match Backend::compiled().first() {
                Some(&first) => Err(matrix
                    .validate(first)
                    .err()
                    .unwrap_or(BackendError::NoBackendsCompiled)),
                None => Err(BackendError::NoBackendsCompiled),
            },
        }
    }

    pub fn active(&self) -> Backend {
        self.active
    }

    pub fn matrix(&self) -> &KernelMatrix {
        &self.matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_compiled() {
        assert!(Backend::compiled().contains(&Backend::Cpu));
    }

    #[test]
    fn kernel_matrix_cpu_supports_all_ops() {
        let matrix = KernelMatrix::probe();
        for &op in KernelOp::all() {
            assert!(matrix.supports(Backend::Cpu, op), "CPU should support {op}");
        }
        assert_eq!(matrix.supported_ops(Backend::Cpu).len(), KernelOp::all().len());
    }

    #[test]
    fn probed_matrix_selects_cpu() {
        let selector = BackendSelector::from_matrix(KernelMatrix::probe()).unwrap();
        assert_eq!(selector.active(), Backend::Cpu);
    }

    #[test]
    fn missing_op_fails_selection() {
        let mut matrix = KernelMatrix::probe();
        matrix.disable(Backend::Cpu, KernelOp::Attention);
        let err = BackendSelector::from_matrix(matrix).unwrap_err();
        assert_eq!(
            err,
            BackendError::UnsupportedOps {
                backend: Backend::Cpu,
                missing: vec![KernelOp::Attention],
            }
        );
    }

    #[test]
    fn empty_matrix_lists_every_op() {
        let err = BackendSelector::from_matrix(KernelMatrix::empty()).unwrap_err();
        let msg = err.to_string();
        for op in KernelOp::all() {
            assert!(msg.contains(&op.to_string()), "{msg}");
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(Backend::Cpu.to_string(), "cpu");
        assert_eq!(KernelOp::MlpSwiGlu.to_string(), "mlp_swiglu");
    }
}
