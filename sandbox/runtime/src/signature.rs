//! Typed host function signatures.
//!
//! Every host function is declared with a [`Signature`] and checked against
//! the guest's declared import type when it is bound, so a guest built
//! against a different ABI fails at `prepare` instead of misreading its
//! arguments at run time.

use std::fmt;

use wasmtime::{Engine, FuncType, ValType};

/// A value kind that can cross the host boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValKind {
    I32,
    I64,
    F32,
    F64,
}

impl ValKind {
    /// Map a wasmtime value type; reference and vector types have no kind.
    pub fn from_val_type(ty: &ValType) -> Option<Self> {
        match ty {
            ValType::I32 => Some(Self::I32),
            ValType::I64 => Some(Self::I64),
            ValType::F32 => Some(Self::F32),
            ValType::F64 => Some(Self::F64),
            _ => None,
        }
    }

    fn val_type(self) -> ValType {
        match self {
            Self::I32 => ValType::I32,
            Self::I64 => ValType::I64,
            Self::F32 => ValType::F32,
            Self::F64 => ValType::F64,
        }
    }
}

impl fmt::Display for ValKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        })
    }
}

/// Ordered parameter kinds and an optional single result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<ValKind>,
    result: Option<ValKind>,
}

impl Signature {
    pub fn new(params: &[ValKind], result: Option<ValKind>) -> Self {
        Self {
            params: params.to_vec(),
            result,
        }
    }

    /// `n` i32 parameters returning i32, the shape of most host calls.
    pub fn i32s(n: usize) -> Self {
        Self {
            params: vec![ValKind::I32; n],
            result: Some(ValKind::I32),
        }
    }

    /// Read the signature of a guest function type. Multi-value results and
    /// non-numeric types are not representable.
    pub fn of(ty: &FuncType) -> Option<Self> {
        let params = ty
            .params()
            .map(|p| ValKind::from_val_type(&p))
            .collect::<Option<Vec<_>>>()?;
        let mut results = ty.results();
        let result = match results.next() {
            Some(r) => Some(ValKind::from_val_type(&r)?),
            None => None,
        };
        if results.next().is_some() {
            return None;
        }
        Some(Self { params, result })
    }

    pub fn params(&self) -> &[ValKind] {
        &self.params
    }

    pub fn result(&self) -> Option<ValKind> {
        self.result
    }

    /// Whether the guest's declared type is exactly this signature.
    pub fn matches(&self, ty: &FuncType) -> bool {
        Self::of(ty).as_ref() == Some(self)
    }

    /// Build the wasmtime function type.
    pub fn func_type(&self, engine: &Engine) -> FuncType {
        FuncType::new(
            engine,
            self.params.iter().map(|k| k.val_type()),
            self.result.map(ValKind::val_type),
        )
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")?;
        if let Some(result) = self.result {
            write!(f, " -> {}", result)?;
        }
        Ok(())
    }
}

/// Render a guest function type for error messages.
pub fn describe(ty: &FuncType) -> String {
    match Signature::of(ty) {
        Some(signature) => signature.to_string(),
        None => format!("{:?}", ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Signature::i32s(2).to_string(), "(i32, i32) -> i32");
        assert_eq!(
            Signature::new(&[ValKind::I32], None).to_string(),
            "(i32)"
        );
    }

    #[test]
    fn matches_declared_types() {
        let engine = Engine::default();
        let ty = FuncType::new(&engine, [ValType::I32, ValType::I64], [ValType::I32]);

        let signature = Signature::new(&[ValKind::I32, ValKind::I64], Some(ValKind::I32));
        assert!(signature.matches(&ty));
        assert!(!Signature::i32s(2).matches(&ty));
        assert_eq!(Signature::of(&ty), Some(signature));
    }

    #[test]
    fn multi_value_is_not_representable() {
        let engine = Engine::default();
        let ty = FuncType::new(&engine, [], [ValType::I32, ValType::I32]);
        assert_eq!(Signature::of(&ty), None);
    }

    #[test]
    fn func_type_round_trips() {
        let engine = Engine::default();
        let signature = Signature::new(&[ValKind::F64], None);
        assert!(signature.matches(&signature.func_type(&engine)));
    }
}
