use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadRejected {
    #[error("upload link expired")]
    Expired,
    #[error("upload signature does not match")]
    BadSignature,
    #[error("invalid object key: {0}")]
    BadKey(String),
    #[error("object {0} already uploaded")]
    AlreadyExists(String),
}

/// Signs and checks `(key, expires)` pairs for upload links.
#[derive(Clone)]
pub struct UrlSigner {
    keyed: HmacSha256,
}

impl UrlSigner {
    pub fn new(secret: &[u8]) -> anyhow::Result<Self> {
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("Invalid signing secret: {}", e))?;
        Ok(Self { keyed })
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(b"PUT\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    pub fn sign(&self, key: &str, expires: i64) -> String {
        hex::encode(self.mac(key, expires).finalize().into_bytes())
    }

    /// `now` and `expires` are unix seconds.
    pub fn verify(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), UploadRejected> {
        let raw = hex::decode(signature).map_err(|_| UploadRejected::BadSignature)?;
        self.mac(key, expires)
            .verify_slice(&raw)
            .map_err(|_| UploadRejected::BadSignature)?;
        if now > expires {
            return Err(UploadRejected::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let signer = UrlSigner::new(b"s3cret").unwrap();
        let sig = signer.sign("selfies/a.jpg", 1_000);
        assert_eq!(signer.verify("selfies/a.jpg", 1_000, &sig, 999), Ok(()));
        assert_eq!(signer.verify("selfies/a.jpg", 1_000, &sig, 1_000), Ok(()));
    }

    #[test]
    fn rejects_tampering_and_expiry() {
        let signer = UrlSigner::new(b"s3cret").unwrap();
        let sig = signer.sign("selfies/a.jpg", 1_000);

        assert_eq!(
            signer.verify("selfies/b.jpg", 1_000, &sig, 0),
            Err(UploadRejected::BadSignature)
        );
        assert_eq!(
            signer.verify("selfies/a.jpg", 2_000, &sig, 0),
            Err(UploadRejected::BadSignature)
        );
        assert_eq!(
            signer.verify("selfies/a.jpg", 1_000, "zz", 0),
            Err(UploadRejected::BadSignature)
        );
        assert_eq!(
            signer.verify("selfies/a.jpg", 1_000, &sig, 1_001),
            Err(UploadRejected::Expired)
        );
        assert_eq!(
            UrlSigner::new(b"other").unwrap().verify("selfies/a.jpg", 1_000, &sig, 0),
            Err(UploadRejected::BadSignature)
        );
    }
}
