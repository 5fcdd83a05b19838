use crate::{
    auth::AuthUser,
    cache::InMemoryCache,
    entities::{booklet, order, paper, purchase, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::{
        catalog::{CatalogService, ProductKind},
        profiles::{ContactDetails, ProfileService},
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

/// A client-held cart line
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub product_type: ProductKind,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub items: Vec<CartLine>,
    pub contact: ContactDetails,
}

/// Result of a successful checkout
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub success: bool,
    pub transaction_id: String,
    pub order_id: Uuid,
    pub subtotal: Decimal,
    pub delivery_charge: Decimal,
    pub total: Decimal,
}

/// A cart line with its catalog price resolved
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub kind: ProductKind,
    pub product_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftLine {
    pub kind: ProductKind,
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

/// Priced order before it is written
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub lines: Vec<DraftLine>,
    pub subtotal: Decimal,
    pub delivery_charge: Decimal,
    pub total: Decimal,
}

/// Prices every line and applies the flat delivery fee once when any line is physical.
pub fn assemble(lines: &[PricedLine], delivery_fee: Decimal) -> OrderDraft {
    let lines: Vec<DraftLine> = lines
        .iter()
        .map(|line| DraftLine {
            kind: line.kind,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            amount: line.unit_price * Decimal::from(line.quantity),
        })
        .collect();

    let subtotal: Decimal = lines.iter().map(|l| l.amount).sum();
    let delivery_charge = if lines.iter().any(|l| l.kind.is_physical()) {
        delivery_fee
    } else {
        Decimal::ZERO
    };

    OrderDraft {
        lines,
        subtotal,
        delivery_charge,
        total: subtotal + delivery_charge,
    }
}

/// Status shown for an order in listings: the common status when all lines
/// agree, `pending` while anything is pending, otherwise `failed`.
pub fn aggregate_status(statuses: &[PaymentStatus]) -> PaymentStatus {
    match statuses.split_first() {
        None => PaymentStatus::Pending,
        Some((first, rest)) if rest.iter().all(|s| s == first) => *first,
        Some(_) if statuses.contains(&PaymentStatus::Pending) => PaymentStatus::Pending,
        Some(_) => PaymentStatus::Failed,
    }
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub transaction_id: String,
    pub user_id: Uuid,
    pub customer_name: Option<String>,
    pub contact_phone: Option<String>,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub item_count: usize,
    pub subtotal: Decimal,
    pub delivery_charge: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderListing {
    pub orders: Vec<OrderSummary>,
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceLine {
    pub purchase_id: Uuid,
    pub product_type: ProductKind,
    pub product_id: Uuid,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub order_id: Uuid,
    pub transaction_id: String,
    pub customer_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub delivery_charge: Decimal,
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusRequest {
    pub status: PaymentStatus,
}

/// A completed purchase in the caller's download library
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    pub purchase_id: Uuid,
    pub transaction_id: String,
    pub paper: Option<paper::Model>,
    pub booklet: Option<booklet::Model>,
    pub quantity: i32,
    pub amount: Decimal,
    pub purchased_at: DateTime<Utc>,
}

/// Order assembly (checkout) and order administration
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<CatalogService>,
    profiles: Arc<ProfileService>,
    listing_cache: InMemoryCache<OrderListing>,
    delivery_fee: Decimal,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<CatalogService>,
        profiles: Arc<ProfileService>,
        listing_cache: InMemoryCache<OrderListing>,
        delivery_fee: Decimal,
    ) -> Self {
        Self {
            db,
            catalog,
            profiles,
            listing_cache,
            delivery_fee,
        }
    }

    pub fn listing_cache(&self) -> &InMemoryCache<OrderListing> {
        &self.listing_cache
    }

    /// Turns a cart and contact form into one cash-on-delivery order
    #[instrument(skip(self, request), fields(user_id = %user.user_id, lines = request.items.len()))]
    pub async fn place_order(
        &self,
        user: &AuthUser,
        request: PlaceOrderRequest,
    ) -> Result<PlacedOrder, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        if let Some(line) = request.items.iter().find(|l| l.quantity < 1) {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for {} must be at least 1",
                line.product_id
            )));
        }
        request.contact.validate()?;

        self.profiles
            .sync_contact(&*self.db, user, &request.contact)
            .await?;

        let mut priced = Vec::with_capacity(request.items.len());
        for line in &request.items {
            let unit_price = self
                .catalog
                .unit_price(&*self.db, line.product_type, line.product_id)
                .await?;
            priced.push(PricedLine {
                kind: line.product_type,
                product_id: line.product_id,
                unit_price,
                quantity: line.quantity as u32,
            });
        }

        let draft = assemble(&priced, self.delivery_fee);
        let transaction_id = Uuid::new_v4().to_string();
        let order_id = self
            .persist(user, &request.contact, &transaction_id, &draft)
            .await
            .map_err(|e| {
                error!(error = %e, "Order insert failed");
                ServiceError::OrderCreationFailed(e.to_string())
            })?;

        self.listing_cache.invalidate_all();
        counter!(
            "checkout.orders_placed",
            1,
            "physical" => if draft.delivery_charge.is_zero() { "false" } else { "true" }
        );
        info!(%transaction_id, %order_id, total = %draft.total, "Order placed");

        Ok(PlacedOrder {
            success: true,
            transaction_id,
            order_id,
            subtotal: draft.subtotal,
            delivery_charge: draft.delivery_charge,
            total: draft.total,
        })
    }

    async fn persist(
        &self,
        user: &AuthUser,
        contact: &ContactDetails,
        transaction_id: &str,
        draft: &OrderDraft,
    ) -> Result<Uuid, sea_orm::DbErr> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(order_id),
            transaction_id: Set(transaction_id.to_string()),
            user_id: Set(user.user_id),
            payment_method: Set(PaymentMethod::Cod),
            subtotal: Set(draft.subtotal),
            delivery_charge: Set(draft.delivery_charge),
            total: Set(draft.total),
            contact_name: Set(Some(contact.full_name.clone())),
            contact_email: Set(Some(contact.email.clone())),
            contact_phone: Set(Some(contact.phone.clone())),
            address: Set(Some(contact.address.clone())),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let lines = draft.lines.iter().map(|line| purchase::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            user_id: Set(user.user_id),
            paper_id: Set((line.kind == ProductKind::Paper).then_some(line.product_id)),
            booklet_id: Set((line.kind == ProductKind::Booklet).then_some(line.product_id)),
            quantity: Set(line.quantity as i32),
            unit_price: Set(line.unit_price),
            amount: Set(line.amount),
            payment_method: Set(PaymentMethod::Cod),
            transaction_id: Set(transaction_id.to_string()),
            payment_status: Set(PaymentStatus::Pending),
            gateway_payment_id: Set(None),
            gateway_trx_id: Set(None),
            address: Set(Some(contact.address.clone())),
            created_at: Set(now),
            updated_at: Set(now),
        });
        purchase::Entity::insert_many(lines)
            .exec_without_returning(&txn)
            .await?;

        txn.commit().await?;
        Ok(order_id)
    }

    /// Paginated order listing for the back office (cached)
    #[instrument(skip(self))]
    pub async fn list_orders(&self, query: OrderListQuery) -> Result<OrderListing, ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query
            .per_page
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let cache_key = format!("orders:{}:{}", page, per_page);

        if let Some(cached) = self.listing_cache.get(&cache_key) {
            return Ok(cached);
        }
        let generation = self.listing_cache.generation();

        let paginator = order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut lines_by_order: HashMap<Uuid, Vec<purchase::Model>> = HashMap::new();
        if !order_ids.is_empty() {
            for line in purchase::Entity::find()
                .filter(purchase::Column::OrderId.is_in(order_ids))
                .all(&*self.db)
                .await?
            {
                lines_by_order.entry(line.order_id).or_default().push(line);
            }
        }

        let orders = orders
            .into_iter()
            .map(|o| {
                let lines = lines_by_order.remove(&o.id).unwrap_or_default();
                let statuses: Vec<PaymentStatus> = lines.iter().map(|l| l.payment_status).collect();
                OrderSummary {
                    order_id: o.id,
                    transaction_id: o.transaction_id,
                    user_id: o.user_id,
                    customer_name: o.contact_name,
                    contact_phone: o.contact_phone,
                    payment_method: o.payment_method,
                    status: aggregate_status(&statuses),
                    item_count: lines.len(),
                    subtotal: o.subtotal,
                    delivery_charge: o.delivery_charge,
                    total: o.total,
                    created_at: o.created_at,
                }
            })
            .collect();

        let listing = OrderListing {
            orders,
            page,
            per_page,
            total,
        };
        if !self
            .listing_cache
            .insert_as_of(cache_key, listing.clone(), generation)
        {
            debug!(page, "Order listing changed during read; not cached");
        }
        Ok(listing)
    }

    async fn find_order(&self, transaction_id: &str) -> Result<order::Model, ServiceError> {
        order::Entity::find()
            .filter(order::Column::TransactionId.eq(transaction_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", transaction_id)))
    }

    /// Invoice for one checkout, with the delivery charge shown once
    #[instrument(skip(self))]
    pub async fn invoice(&self, transaction_id: &str) -> Result<Invoice, ServiceError> {
        let order = self.find_order(transaction_id).await?;
        let lines = purchase::Entity::find()
            .filter(purchase::Column::OrderId.eq(order.id))
            .order_by_asc(purchase::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let paper_ids: Vec<Uuid> = lines.iter().filter_map(|l| l.paper_id).collect();
        let booklet_ids: Vec<Uuid> = lines.iter().filter_map(|l| l.booklet_id).collect();

        let mut titles: HashMap<Uuid, String> = HashMap::new();
        if !paper_ids.is_empty() {
            for p in paper::Entity::find()
                .filter(paper::Column::Id.is_in(paper_ids))
                .all(&*self.db)
                .await?
            {
                titles.insert(p.id, p.title);
            }
        }
        if !booklet_ids.is_empty() {
            for b in booklet::Entity::find()
                .filter(booklet::Column::Id.is_in(booklet_ids))
                .all(&*self.db)
                .await?
            {
                titles.insert(b.id, b.title);
            }
        }

        let statuses: Vec<PaymentStatus> = lines.iter().map(|l| l.payment_status).collect();
        let invoice_lines = lines
            .into_iter()
            .filter_map(|line| {
                let (kind, product_id) = match (line.paper_id, line.booklet_id) {
                    (Some(id), _) => (ProductKind::Paper, id),
                    (None, Some(id)) => (ProductKind::Booklet, id),
                    (None, None) => return None,
                };
                Some(InvoiceLine {
                    purchase_id: line.id,
                    product_type: kind,
                    product_id,
                    title: titles
                        .get(&product_id)
                        .cloned()
                        .unwrap_or_else(|| "Unavailable item".to_string()),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    amount: line.amount,
                    payment_status: line.payment_status,
                })
            })
            .collect();

        Ok(Invoice {
            order_id: order.id,
            transaction_id: order.transaction_id,
            customer_name: order.contact_name,
            contact_email: order.contact_email,
            contact_phone: order.contact_phone,
            address: order.address,
            payment_method: order.payment_method,
            status: aggregate_status(&statuses),
            lines: invoice_lines,
            subtotal: order.subtotal,
            delivery_charge: order.delivery_charge,
            total: order.total,
            created_at: order.created_at,
        })
    }

    /// Settles every pending line of a checkout, e.g. a delivered COD order.
    /// Returns the number of lines changed.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        transaction_id: &str,
        status: PaymentStatus,
    ) -> Result<u64, ServiceError> {
        if !matches!(status, PaymentStatus::Completed | PaymentStatus::Failed) {
            return Err(ServiceError::ValidationError(format!(
                "Orders can only be marked completed or failed, not {}",
                status
            )));
        }

        let order = self.find_order(transaction_id).await?;
        let result = purchase::Entity::update_many()
            .col_expr(purchase::Column::PaymentStatus, Expr::value(status))
            .col_expr(purchase::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(purchase::Column::OrderId.eq(order.id))
            .filter(purchase::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::persistence)?;

        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} has no pending lines",
                transaction_id
            )));
        }

        self.listing_cache.invalidate_all();
        info!(%transaction_id, %status, rows = result.rows_affected, "Order status updated");
        Ok(result.rows_affected)
    }

    /// Completed purchases of a user, newest first
    pub async fn library(&self, user_id: Uuid) -> Result<Vec<LibraryItem>, ServiceError> {
        let lines = purchase::Entity::find()
            .filter(purchase::Column::UserId.eq(user_id))
            .filter(purchase::Column::PaymentStatus.eq(PaymentStatus::Completed))
            .order_by_desc(purchase::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let paper = match line.paper_id {
                Some(id) => paper::Entity::find_by_id(id).one(&*self.db).await?,
                None => None,
            };
            let booklet = match line.booklet_id {
                Some(id) => booklet::Entity::find_by_id(id).one(&*self.db).await?,
                None => None,
            };
            items.push(LibraryItem {
                purchase_id: line.id,
                transaction_id: line.transaction_id,
                paper,
                booklet,
                quantity: line.quantity,
                amount: line.amount,
                purchased_at: line.created_at,
            });
        }
        Ok(items)
    }
}
