//! Local users
//!
//! Loads users, authenticates API tokens, renders the ActivityPub actor
//! document and hands out a signing [`ActivityDelivery`] for a user.
//! Key pairs are generated the first time a user needs to sign.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::data::User;
use crate::error::AppError;
use crate::federation::{ActivityDelivery, RequestSigner, generate_key_pair};
use crate::tenancy::Tenant;

/// Hash stored for an API token
pub fn hash_api_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Fresh random API token
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct UserService {
    tenant: Arc<Tenant>,
}

impl UserService {
    pub fn new(tenant: Arc<Tenant>) -> Self {
        Self { tenant }
    }

    pub async fn get(&self, user_id: &str) -> Result<User, AppError> {
        self.tenant
            .database()
            .get_user(user_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// The tenant's configured owner
    pub async fn owner(&self) -> Result<User, AppError> {
        let username = self.tenant.config().owner.username;
        self.tenant
            .database()
            .get_user_by_username(username.trim())
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Resolve a bearer token to its user
    pub async fn authenticate(&self, token: &str) -> Result<User, AppError> {
        if token.is_empty() {
            return Err(AppError::Unauthorized);
        }
        self.tenant
            .database()
            .get_user_by_token_hash(&hash_api_token(token))
            .await?
            .ok_or(AppError::Unauthorized)
    }

    /// Replace a user's API token; returns the new plaintext token
    pub async fn issue_api_token(&self, user_id: &str) -> Result<String, AppError> {
        let user = self.get(user_id).await?;
        let token = generate_api_token();
        self.tenant
            .database()
            .set_user_token_hash(&user.id, &hash_api_token(&token))
            .await?;
        tracing::info!(user_id = %user.id, "Issued API token");
        Ok(token)
    }

    pub fn key_id(&self, user: &User) -> String {
        format!("{}#main-key", self.tenant.user_url(&user.id))
    }

    /// Make sure `user` has a key pair, generating one if needed
    pub async fn ensure_keys(&self, user: User) -> Result<User, AppError> {
        if user.private_key_pem.is_some() && user.public_key_pem.is_some() {
            return Ok(user);
        }

        let bits = self.tenant.app_config().federation.key_bits;
        tracing::info!(user_id = %user.id, bits, "Generating user key pair");
        let keys = generate_key_pair(bits).await?;

        let database = self.tenant.database();
        if !database
            .set_user_keys_if_absent(&user.id, &keys.private_key_pem, &keys.public_key_pem)
            .await?
        {
            tracing::debug!(user_id = %user.id, "Key pair was stored concurrently");
        }

        database.get_user(&user.id).await?.ok_or(AppError::NotFound)
    }

    /// Delivery service signing as `user`
    pub async fn delivery_for(&self, user: User) -> Result<ActivityDelivery, AppError> {
        let user = self.ensure_keys(user).await?;
        let private_key_pem = user
            .private_key_pem
            .clone()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("User {} has no key", user.id)))?;
        let key_id = self.key_id(&user);

        self.tenant.resolver().set_signer(Some(RequestSigner {
            key_id: key_id.clone(),
            private_key_pem: private_key_pem.clone(),
        }));

        Ok(ActivityDelivery::new(
            self.tenant.http_client().clone(),
            self.tenant.user_url(&user.id),
            key_id,
            private_key_pem,
        ))
    }

    /// ActivityPub actor document
    pub fn actor_document(&self, user: &User) -> serde_json::Value {
        let actor_url = self.tenant.user_url(&user.id);
        let mut actor = serde_json::json!({
            "@context": [
                "https://www.w3.org/ns/activitystreams",
                "https://w3id.org/security/v1"
            ],
            "id": actor_url,
            "type": "Person",
            "preferredUsername": user.username,
            "name": user.display_name.clone().unwrap_or_else(|| user.username.clone()),
            "inbox": format!("{}/inbox", actor_url),
            "outbox": format!("{}/outbox", actor_url),
            "followers": format!("{}/followers", actor_url),
            "following": format!("{}/following", actor_url),
            "url": actor_url,
        });

        if let Some(public_key_pem) = &user.public_key_pem {
            actor["publicKey"] = serde_json::json!({
                "id": self.key_id(user),
                "owner": actor_url,
                "publicKeyPem": public_key_pem,
            });
        }

        actor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenancy::tenant_tests::open_tenant;
    use crate::test_support::{PRIVATE_KEY, PUBLIC_KEY};
    use tempfile::TempDir;

    #[test]
    fn token_hash_is_stable_and_not_plaintext() {
        let token = generate_api_token();
        assert_eq!(hash_api_token(&token), hash_api_token(&token));
        assert_ne!(hash_api_token(&token), token);
        assert_ne!(generate_api_token(), token);
    }

    #[tokio::test]
    async fn issued_tokens_authenticate() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let users = UserService::new(tenant);
        let owner = users.owner().await.unwrap();

        let token = users.issue_api_token(&owner.id).await.unwrap();

        assert_eq!(users.authenticate(&token).await.unwrap().id, owner.id);
        assert!(matches!(
            users.authenticate("wrong").await,
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(users.authenticate("").await, Err(AppError::Unauthorized)));
    }

    #[tokio::test]
    async fn existing_keys_are_kept_and_published() {
        let dir = TempDir::new().unwrap();
        let tenant = open_tenant("foo.example", &dir).await;
        let users = UserService::new(tenant.clone());
        let owner = users.owner().await.unwrap();

        let document = users.actor_document(&owner);
        assert!(document.get("publicKey").is_none());

        tenant
            .database()
            .set_user_keys_if_absent(&owner.id, PRIVATE_KEY, PUBLIC_KEY)
            .await
            .unwrap();
        let owner = users.ensure_keys(users.owner().await.unwrap()).await.unwrap();
        assert_eq!(owner.private_key_pem.as_deref(), Some(PRIVATE_KEY));

        let document = users.actor_document(&owner);
        assert_eq!(document["type"], "Person");
        assert_eq!(document["preferredUsername"], "owner");
        assert_eq!(
            document["inbox"],
            format!("https://foo.example/users/{}/inbox", owner.id)
        );
        assert_eq!(document["publicKey"]["publicKeyPem"], PUBLIC_KEY);

        let delivery = users.delivery_for(owner.clone()).await.unwrap();
        assert_eq!(delivery.actor_uri(), tenant.user_url(&owner.id));
    }
}
