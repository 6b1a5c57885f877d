use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use base64::{engine::general_purpose, Engine as _};
use cbc::{Decryptor, Encryptor};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use totp_rs::{Algorithm, TOTP};
use uuid::Uuid;

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::User;
use crate::services::AuthService;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

const TOTP_ISSUER: &str = "Zee Index";
const TOTP_STEP: u64 = 30;
const CHALLENGE_TTL_SECONDS: i64 = 600;

pub struct TwoFactorService;

impl TwoFactorService {
    fn aes_key(config: &Config) -> [u8; 32] {
        let digest = Sha256::digest(config.jwt.secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        key
    }

    /// IV followed by the ciphertext, base64 encoded
    fn encrypt_secret(config: &Config, plaintext: &[u8]) -> Result<String> {
        let key = Self::aes_key(config);
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut iv);

        let mut buf = vec![0u8; plaintext.len() + 16];
        buf[..plaintext.len()].copy_from_slice(plaintext);
        let ct = Aes256CbcEnc::new(&key.into(), &iv.into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plaintext.len())
            .map_err(|_| AppError::Internal("Encrypt failed".to_string()))?;

        let mut packed = Vec::with_capacity(16 + ct.len());
        packed.extend_from_slice(&iv);
        packed.extend_from_slice(ct);
        Ok(general_purpose::STANDARD.encode(packed))
    }

    fn decrypt_secret(config: &Config, payload_b64: &str) -> Result<Vec<u8>> {
        let payload = general_purpose::STANDARD
            .decode(payload_b64)
            .map_err(|_| AppError::Internal("Invalid encrypted TOTP secret".to_string()))?;
        if payload.len() < 17 {
            return Err(AppError::Internal("Invalid encrypted TOTP secret".to_string()));
        }
        let (iv, ct) = payload.split_at(16);
        let key = Self::aes_key(config);

        let mut buf = ct.to_vec();
        let pt = Aes256CbcDec::new(&key.into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| AppError::Internal("Decrypt failed".to_string()))?;
        Ok(pt.to_vec())
    }

    fn totp(secret: Vec<u8>, account_name: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            TOTP_STEP,
            secret,
            Some(TOTP_ISSUER.to_string()),
            account_name.to_string(),
        )
        .map_err(|e| AppError::Internal(format!("TOTP init failed: {:?}", e)))
    }

    /// Time step the code belongs to, allowing one step of clock drift
    fn matched_step(totp: &TOTP, code: &str, now: u64) -> Option<i64> {
        let code = code.trim();
        let step = now / TOTP_STEP;
        [step.saturating_sub(1), step, step + 1]
            .into_iter()
            .find(|s| totp.generate(s * TOTP_STEP) == code)
            .map(|s| s as i64)
    }

    fn check_code(totp: &TOTP, code: &str) -> Result<i64> {
        Self::matched_step(totp, code, Utc::now().timestamp() as u64)
            .ok_or_else(|| AppError::BadRequest("Invalid verification code".to_string()))
    }

    fn user_totp(config: &Config, user: &User) -> Result<TOTP> {
        if user.totp_enabled == 0 {
            return Err(AppError::BadRequest(
                "Two-factor authentication is not enabled".to_string(),
            ));
        }
        let secret_enc = user
            .totp_secret
            .as_deref()
            .ok_or_else(|| AppError::Internal("Missing TOTP secret".to_string()))?;
        Self::totp(Self::decrypt_secret(config, secret_enc)?, &user.email)
    }

    /// Start enrollment, returns the challenge id and the otpauth URL for the QR code
    pub async fn begin_totp_enroll(
        db: &Database,
        config: &Config,
        user_id: &str,
    ) -> Result<(String, String)> {
        let user = AuthService::get_user(db, user_id).await?;
        if user.totp_enabled != 0 {
            return Err(AppError::BadRequest(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }

        let mut secret = vec![0u8; 20];
        OsRng.fill_bytes(&mut secret);
        let secret_enc = Self::encrypt_secret(config, &secret)?;
        let id = Uuid::new_v4().to_string();

        sqlx::query("DELETE FROM totp_challenges WHERE user_id = ?")
            .bind(user_id)
            .execute(db.pool())
            .await?;
        sqlx::query(
            "INSERT INTO totp_challenges (id, user_id, secret_enc, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(&secret_enc)
        .bind(Utc::now().timestamp() + CHALLENGE_TTL_SECONDS)
        .execute(db.pool())
        .await?;

        let otpauth_url = Self::totp(secret, &user.email)?.get_url();
        Ok((id, otpauth_url))
    }

    pub async fn enable_totp(
        db: &Database,
        config: &Config,
        user_id: &str,
        challenge_id: &str,
        code: &str,
    ) -> Result<()> {
        let secret_enc: String = sqlx::query_scalar(
            "SELECT secret_enc FROM totp_challenges WHERE id = ? AND user_id = ? AND expires_at > ?",
        )
        .bind(challenge_id)
        .bind(user_id)
        .bind(Utc::now().timestamp())
        .fetch_optional(db.pool())
        .await?
        .ok_or_else(|| AppError::BadRequest("Challenge not found or expired".to_string()))?;

        let user = AuthService::get_user(db, user_id).await?;
        if user.totp_enabled != 0 {
            return Err(AppError::BadRequest(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }

        let totp = Self::totp(Self::decrypt_secret(config, &secret_enc)?, &user.email)?;
        let step = Self::check_code(&totp, code)?;

        sqlx::query(
            "UPDATE users SET totp_enabled = 1, totp_secret = ?, totp_last_step = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&secret_enc)
        .bind(step)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(db.pool())
        .await?;
        sqlx::query("DELETE FROM totp_challenges WHERE user_id = ?")
            .bind(user_id)
            .execute(db.pool())
            .await?;

        tracing::info!("Two-factor authentication enabled for {}", user.email);
        Ok(())
    }

    pub async fn disable_totp(
        db: &Database,
        config: &Config,
        user_id: &str,
        code: &str,
    ) -> Result<()> {
        let user = AuthService::get_user(db, user_id).await?;
        let totp = Self::user_totp(config, &user)?;
        Self::check_code(&totp, code)?;

        sqlx::query(
            "UPDATE users SET totp_enabled = 0, totp_secret = NULL, totp_last_step = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .execute(db.pool())
        .await?;

        tracing::info!("Two-factor authentication disabled for {}", user.email);
        Ok(())
    }

    /// Check a sign-in code, a step can only be used once
    pub async fn verify_totp_for_user(
        db: &Database,
        config: &Config,
        user_id: &str,
        code: &str,
    ) -> Result<()> {
        let user = AuthService::get_user(db, user_id).await?;
        let totp = Self::user_totp(config, &user)?;
        let step = Self::check_code(&totp, code)?;

        // Claim the step in one statement so concurrent logins cannot both use it
        let result = sqlx::query(
            r#"
            UPDATE users SET totp_last_step = ?, updated_at = ?
            WHERE id = ? AND (totp_last_step IS NULL OR totp_last_step < ?)
            "#,
        )
        .bind(step)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .bind(step)
        .execute(db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::BadRequest(
                "Verification code already used".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn purge_expired_challenges(db: &Database) -> Result<u64> {
        let result = sqlx::query("DELETE FROM totp_challenges WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::tests::{profile, test_config};

    async fn challenge_totp(db: &Database, config: &Config, challenge_id: &str, email: &str) -> TOTP {
        let secret_enc: String =
            sqlx::query_scalar("SELECT secret_enc FROM totp_challenges WHERE id = ?")
                .bind(challenge_id)
                .fetch_one(db.pool())
                .await
                .unwrap();
        let secret = TwoFactorService::decrypt_secret(config, &secret_enc).unwrap();
        TwoFactorService::totp(secret, email).unwrap()
    }

    fn now() -> u64 {
        Utc::now().timestamp() as u64
    }

    #[test]
    fn test_secret_encryption_roundtrip() {
        let config = test_config();
        let sealed = TwoFactorService::encrypt_secret(&config, b"0123456789abcdefghij").unwrap();
        assert_ne!(sealed, TwoFactorService::encrypt_secret(&config, b"0123456789abcdefghij").unwrap());
        assert_eq!(
            TwoFactorService::decrypt_secret(&config, &sealed).unwrap(),
            b"0123456789abcdefghij"
        );

        let mut other = test_config();
        other.jwt.secret = "another-secret".to_string();
        assert!(TwoFactorService::decrypt_secret(&other, &sealed)
            .map(|pt| pt != b"0123456789abcdefghij")
            .unwrap_or(true));
    }

    #[test]
    fn test_matched_step_allows_one_step_of_drift() {
        let totp = TwoFactorService::totp(vec![7u8; 20], "a@example.com").unwrap();
        let t = 1_700_000_000u64;
        let step = (t / TOTP_STEP) as i64;
        assert_eq!(TwoFactorService::matched_step(&totp, &totp.generate(t), t), Some(step));
        assert_eq!(
            TwoFactorService::matched_step(&totp, &totp.generate(t - TOTP_STEP), t),
            Some(step - 1)
        );
        assert_eq!(
            TwoFactorService::matched_step(&totp, &totp.generate(t - 5 * TOTP_STEP), t),
            None
        );
    }

    #[tokio::test]
    async fn test_enroll_enable_and_replay_protection() {
        let db = Database::in_memory().await;
        let config = test_config();
        let user = AuthService::sign_in(&db, &config, profile("a@example.com"))
            .await
            .unwrap();

        let (challenge_id, url) = TwoFactorService::begin_totp_enroll(&db, &config, &user.id)
            .await
            .unwrap();
        assert!(url.starts_with("otpauth://totp/"));

        let totp = challenge_totp(&db, &config, &challenge_id, &user.email).await;
        let err = TwoFactorService::enable_totp(&db, &config, &user.id, &challenge_id, "000000x")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        // Enrollment consumes the previous step so sign-in needs the next code
        let enroll_time = now() - TOTP_STEP;
        TwoFactorService::enable_totp(
            &db,
            &config,
            &user.id,
            &challenge_id,
            &totp.generate(enroll_time),
        )
        .await
        .unwrap();

        let code = totp.generate(now());
        TwoFactorService::verify_totp_for_user(&db, &config, &user.id, &code)
            .await
            .unwrap();
        let err = TwoFactorService::verify_totp_for_user(&db, &config, &user.id, &code)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(msg) if msg.contains("already used")));
    }

    #[tokio::test]
    async fn test_concurrent_logins_share_one_step() {
        let db = Database::in_memory().await;
        let config = test_config();
        let user = AuthService::sign_in(&db, &config, profile("a@example.com"))
            .await
            .unwrap();
        let (challenge_id, _) = TwoFactorService::begin_totp_enroll(&db, &config, &user.id)
            .await
            .unwrap();
        let totp = challenge_totp(&db, &config, &challenge_id, &user.email).await;
        TwoFactorService::enable_totp(
            &db,
            &config,
            &user.id,
            &challenge_id,
            &totp.generate(now() - TOTP_STEP),
        )
        .await
        .unwrap();

        let code = totp.generate(now());
        let (a, b) = tokio::join!(
            TwoFactorService::verify_totp_for_user(&db, &config, &user.id, &code),
            TwoFactorService::verify_totp_for_user(&db, &config, &user.id, &code),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn test_login_requires_second_factor() {
        let db = Database::in_memory().await;
        let config = test_config();
        let user = AuthService::sign_in(&db, &config, profile("a@example.com"))
            .await
            .unwrap();
        let (challenge_id, _) = TwoFactorService::begin_totp_enroll(&db, &config, &user.id)
            .await
            .unwrap();
        let totp = challenge_totp(&db, &config, &challenge_id, &user.email).await;
        TwoFactorService::enable_totp(
            &db,
            &config,
            &user.id,
            &challenge_id,
            &totp.generate(now() - TOTP_STEP),
        )
        .await
        .unwrap();

        let user = AuthService::get_user(&db, &user.id).await.unwrap();
        let pending = AuthService::complete_login(&config, user).unwrap();
        assert!(pending.mfa_required);
        assert!(pending.session_token.is_none());

        let login = AuthService::login_2fa(
            &db,
            &config,
            pending.mfa_token.as_deref().unwrap(),
            &totp.generate(now()),
        )
        .await
        .unwrap();
        assert!(login.session_token.is_some());
    }
}
