pub mod error;
pub mod gateway;
pub mod memory;
pub mod notify;
pub mod signer;
pub mod wechat;

pub use error::{GatewayError, NotifyError, PaymentError, Result};
pub use gateway::{
    ClientPayment, PaymentGateway, PrepayHandle, PrepayRequest, RefundReceipt, RefundRequest,
    to_minor_units,
};
pub use memory::InMemoryPaymentGateway;
pub use notify::{NotifyCipher, NotifyEnvelope, NotifyResource};
pub use signer::MerchantSigner;
pub use wechat::{DEFAULT_BASE_URL, WechatPayClient, WechatPayConfig};
