pub type Result<T> = std::result::Result<T, crate::error::Error>;

#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let result = $expr;
        $crate::result::verify_arg(result, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::ErrorKind::InvalidArgument {
        name: name.to_string(),
        message: condition.to_string(),
    }
    .into())
}

/// Validates that `[index, index + len)` lies within `[0, size)`.
///
/// Returns `index` back on success so that callers can check and dispatch in one
/// expression.
#[inline]
pub fn check_range(index: usize, len: usize, size: usize) -> Result<usize> {
    match index.checked_add(len) {
        Some(end) if end <= size => Ok(index),
        _ => Err(crate::error::Error::out_of_range(index, len, size)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive(n: i64) -> Result<i64> {
        verify_arg!(n, n > 0);
        Ok(n)
    }

    #[test]
    fn test_verify_arg() {
        assert_eq!(positive(5).unwrap(), 5);
        let err = positive(-1).unwrap_err();
        assert!(err.is_invalid_arg());
        assert!(err.to_string().contains("n > 0"));
    }

    #[test]
    fn test_check_range() {
        assert_eq!(check_range(6, 4, 10).unwrap(), 6);
        assert!(check_range(7, 4, 10).unwrap_err().is_out_of_range());
        assert!(check_range(usize::MAX, 2, 10).is_err());
        assert_eq!(check_range(10, 0, 10).unwrap(), 10);
    }
}
