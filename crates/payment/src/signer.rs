//! SHA256-with-RSA request signing with the merchant credential.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha256;

use crate::{ClientPayment, GatewayError, gateway::nonce_str};

/// Authorization scheme understood by the gateway.
pub const AUTH_SCHEMA: &str = "WECHATPAY2-SHA256-RSA2048";

/// Signs outbound requests and client payment packages.
#[derive(Clone)]
pub struct MerchantSigner {
    mch_id: String,
    serial_no: String,
    key: SigningKey<Sha256>,
}

impl MerchantSigner {
    /// Loads the merchant key from a PKCS#8 PEM document.
    pub fn from_pem(
        mch_id: impl Into<String>,
        serial_no: impl Into<String>,
        pem: &str,
    ) -> Result<Self, GatewayError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| GatewayError::InvalidCredential(e.to_string()))?;
        Ok(Self::new(mch_id, serial_no, key))
    }

    pub fn new(
        mch_id: impl Into<String>,
        serial_no: impl Into<String>,
        key: RsaPrivateKey,
    ) -> Self {
        Self {
            mch_id: mch_id.into(),
            serial_no: serial_no.into(),
            key: SigningKey::<Sha256>::new(key),
        }
    }

    pub fn mch_id(&self) -> &str {
        &self.mch_id
    }

    /// Base64 signature over `message`.
    pub fn sign(&self, message: &str) -> Result<String, GatewayError> {
        let signature = self
            .key
            .try_sign(message.as_bytes())
            .map_err(|e| GatewayError::Signing(e.to_string()))?;
        Ok(STANDARD.encode(signature.to_bytes()))
    }

    /// `Authorization` header value for one request.
    ///
    /// The signed message is `METHOD\nPATH\nTIMESTAMP\nNONCE\nBODY\n`.
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        timestamp: i64,
        nonce: &str,
        body: &str,
    ) -> Result<String, GatewayError> {
        let message = format!("{method}\n{path}\n{timestamp}\n{nonce}\n{body}\n");
        let signature = self.sign(&message)?;
        Ok(format!(
            "{AUTH_SCHEMA} mchid=\"{}\",nonce_str=\"{nonce}\",timestamp=\"{timestamp}\",\
             serial_no=\"{}\",signature=\"{signature}\"",
            self.mch_id, self.serial_no
        ))
    }

    /// Short-lived client signature over app id, timestamp, nonce and prepay handle.
    pub fn client_payment(
        &self,
        app_id: &str,
        prepay_id: &str,
        timestamp: i64,
    ) -> Result<ClientPayment, GatewayError> {
        let nonce = nonce_str();
        let package = format!("prepay_id={prepay_id}");
        let message = format!("{app_id}\n{timestamp}\n{nonce}\n{package}\n");

        Ok(ClientPayment {
            time_stamp: timestamp.to_string(),
            nonce_str: nonce,
            package,
            sign_type: "RSA".to_string(),
            pay_sign: self.sign(&message)?,
        })
    }
}

impl std::fmt::Debug for MerchantSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantSigner")
            .field("mch_id", &self.mch_id)
            .field("serial_no", &self.serial_no)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use rsa::signature::Verifier;
    use std::sync::OnceLock;

    /// Generating a 2048-bit key is slow; share one across tests.
    fn test_key() -> RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
            .clone()
    }

    fn verify(key: &RsaPrivateKey, message: &str, signature_b64: &str) -> bool {
        let verifying = VerifyingKey::<Sha256>::new(key.to_public_key());
        let bytes = STANDARD.decode(signature_b64).unwrap();
        let signature = Signature::try_from(bytes.as_slice()).unwrap();
        verifying.verify(message.as_bytes(), &signature).is_ok()
    }

    #[test]
    fn authorization_header_carries_verifiable_signature() {
        let key = test_key();
        let signer = MerchantSigner::new("1900000001", "SERIAL", key.clone());

        let header = signer
            .authorization("POST", "/v3/pay/transactions/jsapi", 1700000000, "NONCE", "{}")
            .unwrap();
        assert!(header.starts_with(AUTH_SCHEMA));
        assert!(header.contains("mchid=\"1900000001\""));
        assert!(header.contains("serial_no=\"SERIAL\""));

        let signature = header
            .split("signature=\"")
            .nth(1)
            .and_then(|s| s.strip_suffix('"'))
            .unwrap();
        let message = "POST\n/v3/pay/transactions/jsapi\n1700000000\nNONCE\n{}\n";
        assert!(verify(&key, message, signature));
    }

    #[test]
    fn client_payment_signs_package() {
        let key = test_key();
        let signer = MerchantSigner::new("1900000001", "SERIAL", key.clone());

        let client = signer.client_payment("wx-app", "PREPAY", 1700000000).unwrap();
        assert_eq!(client.package, "prepay_id=PREPAY");
        assert_eq!(client.sign_type, "RSA");
        assert_eq!(client.nonce_str.len(), 32);

        let message = format!(
            "wx-app\n1700000000\n{}\nprepay_id=PREPAY\n",
            client.nonce_str
        );
        assert!(verify(&key, &message, &client.pay_sign));
    }

    #[test]
    fn garbage_pem_is_invalid_credential() {
        let result = MerchantSigner::from_pem("m", "s", "not a key");
        assert!(matches!(result, Err(GatewayError::InvalidCredential(_))));
    }
}
