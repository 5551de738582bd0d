/// A lazily computed value that stays valid until explicitly invalidated.
///
/// The owner calls [`Memoized::invalidate`] whenever the inputs the value
/// depends on are written.
#[derive(Debug, Clone)]
pub struct Memoized<T> {
    value: Option<T>,
    evaluations: usize,
}

impl<T> Default for Memoized<T> {
    fn default() -> Self {
        Self {
            value: None,
            evaluations: 0,
        }
    }
}

impl<T> Memoized<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_compute<E>(
        &mut self,
        compute: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<&T, E> {
        match &mut self.value {
            Some(value) => Ok(value),
            slot @ None => {
                let value = compute()?;
                self.evaluations += 1;
                Ok(slot.insert(value))
            }
        }
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some()
    }

    /// Number of times the value has actually been computed.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }
}

#[cfg(test)]
mod tests {
    use super::Memoized;

    fn value(memo: &mut Memoized<i32>, v: i32) -> i32 {
        *memo.get_or_try_compute::<()>(|| Ok(v)).unwrap()
    }

    #[test]
    fn computes_once_until_invalidated() {
        let mut memo = Memoized::new();
        assert_eq!(value(&mut memo, 3), 3);
        assert_eq!(value(&mut memo, 4), 3);
        assert_eq!(memo.evaluations(), 1);

        memo.invalidate();
        assert!(!memo.is_valid());
        assert_eq!(value(&mut memo, 5), 5);
        assert_eq!(memo.evaluations(), 2);
    }

    #[test]
    fn failed_computation_leaves_memo_empty() {
        let mut memo: Memoized<i32> = Memoized::new();
        let result: Result<&i32, &str> = memo.get_or_try_compute(|| Err("nope"));
        assert!(result.is_err());
        assert!(!memo.is_valid());
        assert_eq!(memo.evaluations(), 0);
        assert_eq!(*memo.get_or_try_compute::<&str>(|| Ok(7)).unwrap(), 7);
    }
}
