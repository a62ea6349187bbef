/// Creates a `KdcError` with the given code and an optional formatted e-text
///
/// ```ignore
/// kdc_err!(ErrorCode::POLICY);
/// kdc_err!(ErrorCode::POLICY, "Ticket may not be {}", "forwardable");
/// ```
macro_rules! kdc_err {
    ( $code:expr $(,)? ) => {{
        $crate::KdcError::new($code)
    }};
    ( $code:expr, $($arg:tt)* ) => {{
        $crate::KdcError::new($code).with_text(format!($($arg)*))
    }};
}
