pub mod models;
pub mod validation;

pub use models::{
    Invoice, InvoiceState, LedgerEntry, LineItem, PaymentMethod, PaymentSession, Provider,
    SessionStatus,
};
