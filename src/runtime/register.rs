use crate::runtime::error::{EvalError, EvalResult};
use crate::runtime::value::Value;
use std::cell::RefCell;

type AsyncSetter = Box<dyn FnOnce(Value) -> EvalResult<Value>>;

enum RegOp {
    Set(Value),
    Async(AsyncSetter),
}

enum RegState {
    Current(Value),
    Errored(EvalError),
}

/// A single-assignment value cell, the evaluator's IR. Synchronous `set`
/// stores a value; `set_async` chains a closure over the prior value.
/// `value` forces pending closures in insertion order; the first error is
/// terminal and every later `value` call returns it unchanged.
pub struct Register {
    ops: RefCell<Vec<RegOp>>,
    state: RefCell<RegState>,
}

impl Default for Register {
    fn default() -> Self {
        Self::new()
    }
}

impl Register {
    pub fn new() -> Self {
        Self {
            ops: RefCell::new(Vec::new()),
            state: RefCell::new(RegState::Current(Value::Unit)),
        }
    }

    pub fn set(&self, value: Value) {
        self.ops.borrow_mut().push(RegOp::Set(value));
    }

    pub fn set_async(&self, f: impl FnOnce(Value) -> EvalResult<Value> + 'static) {
        self.ops.borrow_mut().push(RegOp::Async(Box::new(f)));
    }

    /// Force the chain and return the final value or the first stored error.
    pub fn value(&self) -> EvalResult<Value> {
        if let RegState::Errored(err) = &*self.state.borrow() {
            return Err(err.clone());
        }

        loop {
            // Closures may append further ops while running, so drain one at
            // a time without holding the borrow.
            let op = {
                let mut ops = self.ops.borrow_mut();
                if ops.is_empty() {
                    break;
                }
                ops.remove(0)
            };

            let next = match op {
                RegOp::Set(value) => Ok(value),
                RegOp::Async(f) => {
                    let prior = match &*self.state.borrow() {
                        RegState::Current(value) => value.clone(),
                        RegState::Errored(err) => return Err(err.clone()),
                    };
                    f(prior)
                }
            };

            match next {
                Ok(value) => *self.state.borrow_mut() = RegState::Current(value),
                Err(err) => {
                    *self.state.borrow_mut() = RegState::Errored(err.clone());
                    return Err(err);
                }
            }
        }

        match &*self.state.borrow() {
            RegState::Current(value) => Ok(value.clone()),
            RegState::Errored(err) => Err(err.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::error::EvalErrorKind;

    #[test]
    fn value_returns_last_stored() {
        let reg = Register::new();
        reg.set(Value::Int(1));
        reg.set_async(|prior| Ok(Value::Int(prior.as_int()? + 10)));
        reg.set(Value::Int(5));
        assert_eq!(reg.value().unwrap(), Value::Int(5));
    }

    #[test]
    fn async_chain_composes_in_order() {
        let reg = Register::new();
        reg.set(Value::Str("a".into()));
        reg.set_async(|prior| Ok(Value::Str(format!("{}b", prior.as_str()?))));
        reg.set_async(|prior| Ok(Value::Str(format!("{}c", prior.as_str()?))));
        assert_eq!(reg.value().unwrap(), Value::Str("abc".into()));
    }

    #[test]
    fn first_error_is_terminal() {
        let reg = Register::new();
        reg.set_async(|_| Err(EvalError::internal("boom")));
        reg.set_async(|_| Ok(Value::Int(1)));
        let err = reg.value().unwrap_err();
        assert_eq!(
            err.kind,
            EvalErrorKind::Internal {
                message: "boom".into()
            }
        );
        // The error sticks even after more sets.
        reg.set(Value::Int(2));
        assert!(reg.value().is_err());
    }

    #[test]
    fn starts_empty_with_unit() {
        let reg = Register::new();
        assert_eq!(reg.value().unwrap(), Value::Unit);
    }
}
