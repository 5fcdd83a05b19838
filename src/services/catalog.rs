use crate::{
    entities::{booklet, paper},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// What a cart line refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Paper,
    Booklet,
}

impl ProductKind {
    /// Booklets are printed and shipped; papers are downloads.
    pub fn is_physical(self) -> bool {
        matches!(self, ProductKind::Booklet)
    }
}

/// Authoritative unit price of a paper: free unless premium, and a premium
/// paper without a price is also free.
pub fn paper_unit_price(paper: &paper::Model) -> Decimal {
    if paper.is_premium {
        paper.price.unwrap_or(Decimal::ZERO)
    } else {
        Decimal::ZERO
    }
}

pub fn booklet_unit_price(booklet: &booklet::Model) -> Decimal {
    booklet.price
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaperFilter {
    pub level: Option<String>,
    pub subject: Option<String>,
    pub premium: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaperRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    #[validate(length(min = 1, max = 32))]
    pub level: String,
    #[validate(length(min = 1, max = 128))]
    pub subject: String,
    #[validate(range(min = 1950, max = 2100))]
    pub year: i32,
    pub paper_number: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1))]
    pub file_url: String,
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePaperRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub file_url: Option<String>,
    pub cover_image_url: Option<String>,
    pub is_premium: Option<bool>,
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookletRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub cover_image_url: Option<String>,
    pub level: Option<String>,
    pub subject: Option<String>,
}

fn ensure_non_negative(price: Option<Decimal>) -> Result<(), ServiceError> {
    match price {
        Some(p) if p.is_sign_negative() => Err(ServiceError::ValidationError(
            "price must not be negative".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Catalog reads, price lookups and administrative catalog writes
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves the authoritative unit price of a product, failing with
    /// `NotFound` naming the missing id.
    pub async fn unit_price<C: ConnectionTrait>(
        &self,
        conn: &C,
        kind: ProductKind,
        product_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        match kind {
            ProductKind::Paper => paper::Entity::find_by_id(product_id)
                .one(conn)
                .await?
                .map(|p| paper_unit_price(&p))
                .ok_or_else(|| ServiceError::NotFound(format!("Paper not found: {}", product_id))),
            ProductKind::Booklet => booklet::Entity::find_by_id(product_id)
                .one(conn)
                .await?
                .map(|b| booklet_unit_price(&b))
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Booklet not found: {}", product_id))
                }),
        }
    }

    #[instrument(skip(self))]
    pub async fn list_papers(&self, filter: PaperFilter) -> Result<Vec<paper::Model>, ServiceError> {
        let mut query = paper::Entity::find();
        if let Some(level) = filter.level.filter(|l| !l.trim().is_empty()) {
            query = query.filter(paper::Column::Level.eq(level));
        }
        if let Some(subject) = filter.subject.filter(|s| !s.trim().is_empty()) {
            query = query.filter(paper::Column::Subject.eq(subject));
        }
        if let Some(premium) = filter.premium {
            query = query.filter(paper::Column::IsPremium.eq(premium));
        }

        Ok(query
            .order_by_desc(paper::Column::Year)
            .order_by_asc(paper::Column::Title)
            .all(&*self.db)
            .await?)
    }

    pub async fn get_paper(&self, id: Uuid) -> Result<paper::Model, ServiceError> {
        paper::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Paper {} not found", id)))
    }

    pub async fn list_booklets(&self) -> Result<Vec<booklet::Model>, ServiceError> {
        Ok(booklet::Entity::find()
            .order_by_asc(booklet::Column::Title)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create_paper(&self, input: CreatePaperRequest) -> Result<paper::Model, ServiceError> {
        input.validate()?;
        ensure_non_negative(input.price)?;

        let now = Utc::now();
        let model = paper::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(input.title),
            level: Set(input.level),
            subject: Set(input.subject),
            year: Set(input.year),
            paper_number: Set(input.paper_number),
            description: Set(input.description),
            file_url: Set(input.file_url),
            cover_image_url: Set(input.cover_image_url),
            is_premium: Set(input.is_premium),
            price: Set(input.price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::persistence)?;

        info!(paper_id = %model.id, "Paper created");
        Ok(model)
    }

    #[instrument(skip(self, input))]
    pub async fn update_paper(
        &self,
        id: Uuid,
        input: UpdatePaperRequest,
    ) -> Result<paper::Model, ServiceError> {
        ensure_non_negative(input.price)?;
        let existing = self.get_paper(id).await?;

        let mut model: paper::ActiveModel = existing.into();
        if let Some(title) = input.title {
            model.title = Set(title);
        }
        if let Some(description) = input.description {
            model.description = Set(Some(description));
        }
        if let Some(file_url) = input.file_url {
            model.file_url = Set(file_url);
        }
        if let Some(cover) = input.cover_image_url {
            model.cover_image_url = Set(Some(cover));
        }
        if let Some(is_premium) = input.is_premium {
            model.is_premium = Set(is_premium);
        }
        if let Some(price) = input.price {
            model.price = Set(Some(price));
        }
        model.updated_at = Set(Utc::now());

        model
            .update(&*self.db)
            .await
            .map_err(ServiceError::persistence)
    }

    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create_booklet(
        &self,
        input: CreateBookletRequest,
    ) -> Result<booklet::Model, ServiceError> {
        input.validate()?;
        ensure_non_negative(Some(input.price))?;

        let now = Utc::now();
        let model = booklet::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(input.title),
            description: Set(input.description),
            price: Set(input.price),
            cover_image_url: Set(input.cover_image_url),
            level: Set(input.level),
            subject: Set(input.subject),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(ServiceError::persistence)?;

        info!(booklet_id = %model.id, "Booklet created");
        Ok(model)
    }
}
