//! Rendering of panic payloads.

use std::any::Any;

/// Renders a caught panic payload as text.
///
/// `panic!` with a literal produces a `&'static str` payload, a formatted
/// `panic!` produces a `String`; anything else is opaque.
///
/// # Example
///
/// ```
/// use cinegate_core::describe_panic;
///
/// let payload = std::panic::catch_unwind(|| panic!("movie {} missing", 7)).unwrap_err();
/// assert_eq!(describe_panic(payload.as_ref()), "movie 7 missing");
/// ```
#[must_use]
pub fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_str_payload() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(describe_panic(payload.as_ref()), "boom");
    }

    #[test]
    fn test_string_payload() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("formatted boom"));
        assert_eq!(describe_panic(payload.as_ref()), "formatted boom");
    }

    #[test]
    fn test_opaque_payload() {
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(describe_panic(payload.as_ref()), "non-string panic payload");
    }
}
