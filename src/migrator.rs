use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260101_000001_create_catalog_tables::Migration),
            Box::new(m20260101_000002_create_invoice_tables::Migration),
            Box::new(m20260101_000003_create_reservation_tables::Migration),
            Box::new(m20260101_000004_create_accounting_tables::Migration),
        ]
    }
}

// Migration implementations

mod m20260101_000001_create_catalog_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Projects::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Projects::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Projects::BusinessId).uuid().not_null())
                        .col(ColumnDef::new(Projects::Name).string().not_null())
                        .col(
                            ColumnDef::new(Projects::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::BusinessId).uuid().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Sku).string().null())
                        .col(
                            ColumnDef::new(Products::IsStocked)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::UnitCostCents)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::BusinessId).uuid().not_null())
                        .col(ColumnDef::new(InventoryMovements::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryMovements::MovementType)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryMovements::Quantity)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::InvoiceId).uuid().null())
                        .col(ColumnDef::new(InventoryMovements::Note).string().null())
                        .col(ColumnDef::new(InventoryMovements::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_movements_product")
                                .from(InventoryMovements::Table, InventoryMovements::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_business_id")
                        .table(Products::Table)
                        .col(Products::BusinessId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_movements_product_id")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryMovements::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Projects::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Projects {
        Table,
        Id,
        BusinessId,
        Name,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Products {
        Table,
        Id,
        BusinessId,
        Name,
        Sku,
        IsStocked,
        UnitCostCents,
        CreatedAt,
        DeletedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryMovements {
        Table,
        Id,
        BusinessId,
        ProductId,
        MovementType,
        Quantity,
        InvoiceId,
        Note,
        CreatedBy,
        CreatedAt,
    }
}

mod m20260101_000002_create_invoice_tables {
    use super::m20260101_000001_create_catalog_tables::Projects;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000002_create_invoice_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Invoices::BusinessId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::ProjectId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::ClientId).uuid().null())
                        .col(ColumnDef::new(Invoices::QuoteId).uuid().null())
                        .col(ColumnDef::new(Invoices::InvoiceNumber).string().null())
                        .col(ColumnDef::new(Invoices::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Invoices::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Invoices::DepositPercent)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Invoices::TotalCents).big_integer().not_null())
                        .col(ColumnDef::new(Invoices::DepositCents).big_integer().not_null())
                        .col(ColumnDef::new(Invoices::BalanceCents).big_integer().not_null())
                        .col(
                            ColumnDef::new(Invoices::IssuedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Invoices::DueAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Invoices::PaidAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Invoices::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoices_project")
                                .from(Invoices::Table, Invoices::ProjectId)
                                .to(Projects::Table, Projects::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InvoiceItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InvoiceItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoiceItems::InvoiceId).uuid().not_null())
                        .col(ColumnDef::new(InvoiceItems::Position).integer().not_null())
                        .col(ColumnDef::new(InvoiceItems::Label).string().not_null())
                        .col(ColumnDef::new(InvoiceItems::ProductId).uuid().null())
                        .col(ColumnDef::new(InvoiceItems::Quantity).big_integer().not_null())
                        .col(
                            ColumnDef::new(InvoiceItems::UnitPriceCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoiceItems::Discount).json().null())
                        .col(
                            ColumnDef::new(InvoiceItems::LineTotalCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoice_items_invoice")
                                .from(InvoiceItems::Table, InvoiceItems::InvoiceId)
                                .to(Invoices::Table, Invoices::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::BusinessId).uuid().not_null())
                        .col(ColumnDef::new(Payments::InvoiceId).uuid().not_null())
                        .col(ColumnDef::new(Payments::AmountCents).big_integer().not_null())
                        .col(
                            ColumnDef::new(Payments::PaidAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::Method).string_len(16).not_null())
                        .col(ColumnDef::new(Payments::Reference).string().null())
                        .col(ColumnDef::new(Payments::Note).text().null())
                        .col(ColumnDef::new(Payments::Metadata).json().null())
                        .col(ColumnDef::new(Payments::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Payments::DeletedBy).uuid().null())
                        .check(Expr::col(Payments::AmountCents).gt(0))
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_invoice")
                                .from(Payments::Table, Payments::InvoiceId)
                                .to(Invoices::Table, Invoices::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoices_business_status")
                        .table(Invoices::Table)
                        .col(Invoices::BusinessId)
                        .col(Invoices::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("uq_invoices_business_number")
                        .table(Invoices::Table)
                        .col(Invoices::BusinessId)
                        .col(Invoices::InvoiceNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_invoice_items_invoice_id")
                        .table(InvoiceItems::Table)
                        .col(InvoiceItems::InvoiceId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_invoice_id")
                        .table(Payments::Table)
                        .col(Payments::InvoiceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InvoiceItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Invoices {
        Table,
        Id,
        BusinessId,
        ProjectId,
        ClientId,
        QuoteId,
        InvoiceNumber,
        Status,
        Currency,
        DepositPercent,
        TotalCents,
        DepositCents,
        BalanceCents,
        IssuedAt,
        DueAt,
        PaidAt,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
        DeletedAt,
    }

    #[derive(DeriveIden)]
    enum InvoiceItems {
        Table,
        Id,
        InvoiceId,
        Position,
        Label,
        ProductId,
        Quantity,
        UnitPriceCents,
        Discount,
        LineTotalCents,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        BusinessId,
        InvoiceId,
        AmountCents,
        PaidAt,
        Method,
        Reference,
        Note,
        Metadata,
        CreatedBy,
        CreatedAt,
        DeletedAt,
        DeletedBy,
    }
}

mod m20260101_000003_create_reservation_tables {
    use super::m20260101_000002_create_invoice_tables::Invoices;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000003_create_reservation_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryReservations::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryReservations::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::BusinessId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::InvoiceId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::Status)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::CreatedBy)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservations::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_reservations_invoice")
                                .from(InventoryReservations::Table, InventoryReservations::InvoiceId)
                                .to(Invoices::Table, Invoices::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryReservationItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryReservationItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservationItems::ReservationId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservationItems::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryReservationItems::Quantity)
                                .big_integer()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_reservation_items_reservation")
                                .from(
                                    InventoryReservationItems::Table,
                                    InventoryReservationItems::ReservationId,
                                )
                                .to(InventoryReservations::Table, InventoryReservations::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_reservation_items_product")
                        .table(InventoryReservationItems::Table)
                        .col(InventoryReservationItems::ProductId)
                        .to_owned(),
                )
                .await?;

            // One ACTIVE reservation per invoice. sea-query has no partial index
            // builder; this statement is valid on both PostgreSQL and SQLite.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_inventory_reservations_active_invoice \
                     ON inventory_reservations (invoice_id) WHERE status = 'ACTIVE'",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(InventoryReservationItems::Table)
                        .to_owned(),
                )
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryReservations::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryReservations {
        Table,
        Id,
        BusinessId,
        InvoiceId,
        Status,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryReservationItems {
        Table,
        Id,
        ReservationId,
        ProductId,
        Quantity,
    }
}

mod m20260101_000004_create_accounting_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260101_000004_create_accounting_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(LedgerEntries::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(LedgerEntries::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LedgerEntries::BusinessId).uuid().not_null())
                        .col(
                            ColumnDef::new(LedgerEntries::SourceType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(LedgerEntries::SourceId).uuid().not_null())
                        .col(
                            ColumnDef::new(LedgerEntries::AmountCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LedgerEntries::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(LedgerEntries::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(LedgerEntries::Details).json().null())
                        .col(ColumnDef::new(LedgerEntries::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(LedgerEntries::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(LedgerEntries::UpdatedAt)
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
                        .unique()
                        .name("uq_ledger_entries_source")
                        .table(LedgerEntries::Table)
                        .col(LedgerEntries::BusinessId)
                        .col(LedgerEntries::SourceType)
                        .col(LedgerEntries::SourceId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Finances::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Finances::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Finances::BusinessId).uuid().not_null())
                        .col(ColumnDef::new(Finances::InvoiceId).uuid().null())
                        .col(ColumnDef::new(Finances::Kind).string_len(16).not_null())
                        .col(ColumnDef::new(Finances::Category).string().not_null())
                        .col(ColumnDef::new(Finances::AmountCents).big_integer().not_null())
                        .col(ColumnDef::new(Finances::Currency).string_len(3).not_null())
                        .col(
                            ColumnDef::new(Finances::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Finances::Note).text().null())
                        .col(ColumnDef::new(Finances::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(Finances::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Finances::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One live income record per invoice and category.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_finances_live_invoice_category \
                     ON finances (invoice_id, category) WHERE deleted_at IS NULL",
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(DocumentSequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DocumentSequences::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(DocumentSequences::BusinessId).uuid().not_null())
                        .col(
                            ColumnDef::new(DocumentSequences::DocumentType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(DocumentSequences::Year).integer().not_null())
                        .col(
                            ColumnDef::new(DocumentSequences::LastValue)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(DocumentSequences::UpdatedAt)
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
                        .unique()
                        .name("uq_document_sequences_scope")
                        .table(DocumentSequences::Table)
                        .col(DocumentSequences::BusinessId)
                        .col(DocumentSequences::DocumentType)
                        .col(DocumentSequences::Year)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(DocumentSequences::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Finances::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(LedgerEntries::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum LedgerEntries {
        Table,
        Id,
        BusinessId,
        SourceType,
        SourceId,
        AmountCents,
        Currency,
        OccurredAt,
        Details,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Finances {
        Table,
        Id,
        BusinessId,
        InvoiceId,
        Kind,
        Category,
        AmountCents,
        Currency,
        OccurredAt,
        Note,
        CreatedBy,
        CreatedAt,
        DeletedAt,
    }

    #[derive(DeriveIden)]
    enum DocumentSequences {
        Table,
        Id,
        BusinessId,
        DocumentType,
        Year,
        LastValue,
        UpdatedAt,
    }
}
