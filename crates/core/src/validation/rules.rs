use crate::models::Provider;

/// Normalize an Indonesian mobile number to `628…` digits.
///
/// Accepts `08…`, `+628…` and `628…` forms. Returns None when the input is
/// not a plausible MSISDN.
pub fn normalize_msisdn(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    let normalized = if let Some(rest) = digits.strip_prefix("628") {
        format!("628{}", rest)
    } else if let Some(rest) = digits.strip_prefix("08") {
        format!("628{}", rest)
    } else {
        return None;
    };

    // 628 + 8..11 subscriber digits
    if normalized.len() < 11 || normalized.len() > 14 {
        return None;
    }
    Some(normalized)
}

/// Validate a charge request once, at session creation.
///
/// Provider-specific requirements live here rather than at each render or
/// branch point: OVO is a push charge and cannot be initiated without the
/// payer's phone number; GoPay needs no payer identity up front.
pub fn check_charge_request(
    provider: Provider,
    amount: i64,
    payer_phone: Option<&str>,
) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();

    if amount <= 0 {
        errs.push("Charge amount must be greater than zero".to_string());
    }

    match provider {
        Provider::Ovo => match payer_phone {
            None => errs.push("OVO push charge requires the payer's phone number".to_string()),
            Some(raw) => {
                if normalize_msisdn(raw).is_none() {
                    errs.push(format!("Payer phone number is not a valid MSISDN: {}", raw));
                }
            }
        },
        Provider::Gopay => {
            if let Some(raw) = payer_phone {
                if normalize_msisdn(raw).is_none() {
                    errs.push(format!("Payer phone number is not a valid MSISDN: {}", raw));
                }
            }
        }
    }

    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msisdn_forms_normalize_to_628() {
        assert_eq!(normalize_msisdn("081234567890").as_deref(), Some("6281234567890"));
        assert_eq!(normalize_msisdn("+62 812-3456-7890").as_deref(), Some("6281234567890"));
        assert_eq!(normalize_msisdn("6281234567890").as_deref(), Some("6281234567890"));
        assert_eq!(normalize_msisdn("12345"), None);
        assert_eq!(normalize_msisdn("not a phone"), None);
    }

    #[test]
    fn ovo_requires_payer_phone() {
        assert!(check_charge_request(Provider::Ovo, 5_000, None).is_err());
        assert!(check_charge_request(Provider::Ovo, 5_000, Some("081234567890")).is_ok());
    }

    #[test]
    fn gopay_phone_is_optional() {
        assert!(check_charge_request(Provider::Gopay, 5_000, None).is_ok());
    }

    #[test]
    fn non_positive_amount_rejected() {
        assert!(check_charge_request(Provider::Gopay, 0, None).is_err());
        assert!(check_charge_request(Provider::Gopay, -100, None).is_err());
    }
}
