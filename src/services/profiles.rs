use crate::{
    auth::AuthUser, config::AppConfig, entities::user_profile, errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Contact and delivery details captured at checkout
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetails {
    #[validate(length(min = 1, max = 255))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 1024))]
    pub address: String,
}

/// Profiles, contact sync and the administrator gate
#[derive(Clone)]
pub struct ProfileService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
}

impl ProfileService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Writes name, phone and address from a checkout form onto the caller's
    /// profile, creating the profile on first use.
    #[instrument(skip(self, conn, contact), fields(user_id = %user.user_id))]
    pub async fn sync_contact<C: ConnectionTrait>(
        &self,
        conn: &C,
        user: &AuthUser,
        contact: &ContactDetails,
    ) -> Result<user_profile::Model, ServiceError> {
        let now = Utc::now();
        let model = user_profile::ActiveModel {
            id: Set(user.user_id),
            full_name: Set(Some(contact.full_name.clone())),
            email: Set(user.email.clone().or_else(|| Some(contact.email.clone()))),
            phone: Set(Some(contact.phone.clone())),
            address: Set(Some(contact.address.clone())),
            is_admin: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // An existing profile keeps its email, admin flag and creation time.
        let upsert = OnConflict::column(user_profile::Column::Id)
            .update_columns([
                user_profile::Column::FullName,
                user_profile::Column::Phone,
                user_profile::Column::Address,
                user_profile::Column::UpdatedAt,
            ])
            .to_owned();

        Self::upsert(conn, user.user_id, model, upsert)
            .await
            .map_err(|e| {
                warn!(error = %e, "Profile contact sync failed");
                ServiceError::ProfileUpdateFailed(e.to_string())
            })
    }

    /// Returns the caller's profile, creating an empty one from the token claims
    pub async fn get_or_create(&self, user: &AuthUser) -> Result<user_profile::Model, ServiceError> {
        if let Some(profile) = user_profile::Entity::find_by_id(user.user_id)
            .one(&*self.db)
            .await?
        {
            return Ok(profile);
        }

        let now = Utc::now();
        let model = user_profile::ActiveModel {
            id: Set(user.user_id),
            full_name: Set(user.name.clone()),
            email: Set(user.email.clone()),
            phone: Set(None),
            address: Set(None),
            is_admin: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // A concurrent first request may have created it already.
        let keep_existing = OnConflict::column(user_profile::Column::Id)
            .do_nothing()
            .to_owned();

        Self::upsert(&*self.db, user.user_id, model, keep_existing)
            .await
            .map_err(ServiceError::persistence)
    }

    async fn upsert<C: ConnectionTrait>(
        conn: &C,
        id: Uuid,
        model: user_profile::ActiveModel,
        on_conflict: OnConflict,
    ) -> Result<user_profile::Model, DbErr> {
        user_profile::Entity::insert(model)
            .on_conflict(on_conflict)
            .exec_without_returning(conn)
            .await?;
        user_profile::Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("user profile {}", id)))
    }

    /// Admits the caller when their profile is flagged admin, or when their
    /// token email is the configured master administrator (who is promoted).
    #[instrument(skip(self), fields(user_id = %user.user_id))]
    pub async fn require_admin(&self, user: &AuthUser) -> Result<user_profile::Model, ServiceError> {
        let profile = self.get_or_create(user).await?;
        if profile.is_admin {
            return Ok(profile);
        }

        let is_master = user
            .email
            .as_deref()
            .map(|email| self.config.is_master_admin_email(email))
            .unwrap_or(false);

        if !is_master {
            return Err(ServiceError::Forbidden(
                "Administrator access required".to_string(),
            ));
        }

        info!("Promoting master administrator profile");
        let mut model: user_profile::ActiveModel = profile.into();
        model.is_admin = Set(true);
        model.updated_at = Set(Utc::now());
        model
            .update(&*self.db)
            .await
            .map_err(ServiceError::persistence)
    }

    pub async fn list_profiles(&self) -> Result<Vec<user_profile::Model>, ServiceError> {
        Ok(user_profile::Entity::find()
            .order_by_desc(user_profile::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn set_admin(
        &self,
        profile_id: Uuid,
        is_admin: bool,
    ) -> Result<user_profile::Model, ServiceError> {
        let profile = user_profile::Entity::find_by_id(profile_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", profile_id)))?;

        if !is_admin
            && profile
                .email
                .as_deref()
                .map(|email| self.config.is_master_admin_email(email))
                .unwrap_or(false)
        {
            return Err(ServiceError::InvalidOperation(
                "The master administrator cannot be demoted".to_string(),
            ));
        }

        let mut model: user_profile::ActiveModel = profile.into();
        model.is_admin = Set(is_admin);
        model.updated_at = Set(Utc::now());
        let updated = model
            .update(&*self.db)
            .await
            .map_err(ServiceError::persistence)?;

        info!(profile_id = %profile_id, is_admin, "Administrator flag changed");
        Ok(updated)
    }
}
