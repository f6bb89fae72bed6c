mod rules;

pub use rules::{check_charge_request, normalize_msisdn};
