use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_catalog_tables::Migration),
            Box::new(m20240101_000002_create_user_profiles_table::Migration),
            Box::new(m20240101_000003_create_orders_table::Migration),
            Box::new(m20240101_000004_create_purchases_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Papers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Papers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Papers::Title).string().not_null())
                        .col(ColumnDef::new(Papers::Level).string().not_null())
                        .col(ColumnDef::new(Papers::Subject).string().not_null())
                        .col(ColumnDef::new(Papers::Year).integer().not_null())
                        .col(ColumnDef::new(Papers::PaperNumber).string().null())
                        .col(ColumnDef::new(Papers::Description).text().null())
                        .col(ColumnDef::new(Papers::FileUrl).string().not_null())
                        .col(ColumnDef::new(Papers::CoverImageUrl).string().null())
                        .col(
                            ColumnDef::new(Papers::IsPremium)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Papers::Price).decimal_len(12, 2).null())
                        .col(
                            ColumnDef::new(Papers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Papers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_papers_level_subject")
                        .table(Papers::Table)
                        .col(Papers::Level)
                        .col(Papers::Subject)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Booklets::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Booklets::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Booklets::Title).string().not_null())
                        .col(ColumnDef::new(Booklets::Description).text().null())
                        .col(ColumnDef::new(Booklets::Price).decimal_len(12, 2).not_null())
                        .col(ColumnDef::new(Booklets::CoverImageUrl).string().null())
                        .col(ColumnDef::new(Booklets::Level).string().null())
                        .col(ColumnDef::new(Booklets::Subject).string().null())
                        .col(
                            ColumnDef::new(Booklets::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Booklets::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Booklets::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Papers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Papers {
        Table,
        Id,
        Title,
        Level,
        Subject,
        Year,
        PaperNumber,
        Description,
        FileUrl,
        CoverImageUrl,
        IsPremium,
        Price,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Booklets {
        Table,
        Id,
        Title,
        Description,
        Price,
        CoverImageUrl,
        Level,
        Subject,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000002_create_user_profiles_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_user_profiles_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(UserProfiles::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserProfiles::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(UserProfiles::FullName).string().null())
                        .col(ColumnDef::new(UserProfiles::Email).string().null())
                        .col(ColumnDef::new(UserProfiles::Phone).string().null())
                        .col(ColumnDef::new(UserProfiles::Address).text().null())
                        .col(
                            ColumnDef::new(UserProfiles::IsAdmin)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(UserProfiles::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(UserProfiles::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UserProfiles::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum UserProfiles {
        Table,
        Id,
        FullName,
        Email,
        Phone,
        Address,
        IsAdmin,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::TransactionId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Orders::Subtotal)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::DeliveryCharge)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Orders::Total)
                                .decimal_len(12, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::ContactName).string().null())
                        .col(ColumnDef::new(Orders::ContactEmail).string().null())
                        .col(ColumnDef::new(Orders::ContactPhone).string().null())
                        .col(ColumnDef::new(Orders::Address).text().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_created_at")
                        .table(Orders::Table)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        TransactionId,
        UserId,
        PaymentMethod,
        Subtotal,
        DeliveryCharge,
        Total,
        ContactName,
        ContactEmail,
        ContactPhone,
        Address,
        CreatedAt,
    }
}

mod m20240101_000004_create_purchases_table {

    use super::m20240101_000001_create_catalog_tables::{Booklets, Papers};
    use super::m20240101_000003_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_purchases_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Purchases::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Purchases::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Purchases::OrderId).uuid().not_null())
                        .col(ColumnDef::new(Purchases::UserId).uuid().not_null())
                        .col(ColumnDef::new(Purchases::PaperId).uuid().null())
                        .col(ColumnDef::new(Purchases::BookletId).uuid().null())
                        .col(
                            ColumnDef::new(Purchases::Quantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Purchases::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Purchases::Amount).decimal_len(12, 2).not_null())
                        .col(
                            ColumnDef::new(Purchases::PaymentMethod)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Purchases::TransactionId).string().not_null())
                        .col(
                            ColumnDef::new(Purchases::PaymentStatus)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Purchases::GatewayPaymentId).string().null())
                        .col(ColumnDef::new(Purchases::GatewayTrxId).string().null())
                        .col(ColumnDef::new(Purchases::Address).text().null())
                        .col(
                            ColumnDef::new(Purchases::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Purchases::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchases_order_id")
                                .from(Purchases::Table, Purchases::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchases_paper_id")
                                .from(Purchases::Table, Purchases::PaperId)
                                .to(Papers::Table, Papers::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchases_booklet_id")
                                .from(Purchases::Table, Purchases::BookletId)
                                .to(Booklets::Table, Booklets::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchases_transaction_id")
                        .table(Purchases::Table)
                        .col(Purchases::TransactionId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchases_user_paper")
                        .table(Purchases::Table)
                        .col(Purchases::UserId)
                        .col(Purchases::PaperId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchases_payment_status")
                        .table(Purchases::Table)
                        .col(Purchases::PaymentStatus)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Purchases::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Purchases {
        Table,
        Id,
        OrderId,
        UserId,
        PaperId,
        BookletId,
        Quantity,
        UnitPrice,
        Amount,
        PaymentMethod,
        TransactionId,
        PaymentStatus,
        GatewayPaymentId,
        GatewayTrxId,
        Address,
        CreatedAt,
        UpdatedAt,
    }
}
