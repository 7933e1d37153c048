use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_tables::Migration),
            Box::new(m20240601_000002_create_order_tables::Migration),
            Box::new(m20240601_000003_seed_payment_methods::Migration),
        ]
    }
}

mod m20240601_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Products::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal_len(15, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Discounts::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Discounts::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Discounts::Code).string().not_null())
                        .col(
                            ColumnDef::new(Discounts::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_discounts_code")
                        .table(Discounts::Table)
                        .col(Discounts::Code)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CartItems::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(CartItems::UserId).integer().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).integer().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::Selected)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_product_id")
                                .from(CartItems::Table, CartItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_user_id")
                        .table(CartItems::Table)
                        .col(CartItems::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PaymentMethods::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PaymentMethods::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(PaymentMethods::MethodName).string().not_null())
                        .col(
                            ColumnDef::new(PaymentMethods::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PaymentMethods::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Discounts::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Price,
        Quantity,
        IsDeleted,
    }

    #[derive(DeriveIden)]
    pub(super) enum Discounts {
        Table,
        Id,
        Code,
        IsDeleted,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        UserId,
        ProductId,
        Quantity,
        Selected,
    }

    #[derive(DeriveIden)]
    pub(super) enum PaymentMethods {
        Table,
        Id,
        MethodName,
        IsDeleted,
    }
}

mod m20240601_000002_create_order_tables {

    use super::m20240601_000001_create_catalog_tables::{Discounts, PaymentMethods, Products};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_order_tables"
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
                        .col(
                            ColumnDef::new(Orders::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal_len(15, 2).not_null())
                        .col(
                            ColumnDef::new(Orders::DiscountAmount)
                                .decimal_len(15, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::FinalTotal).decimal_len(15, 2).not_null())
                        .col(
                            ColumnDef::new(Orders::OrderDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::ShippingStatus).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::ShippingName).string().null())
                        .col(ColumnDef::new(Orders::ShippingAddress).string().null())
                        .col(ColumnDef::new(Orders::ShippingPhone).string().null())
                        .col(ColumnDef::new(Orders::UserId).integer().not_null())
                        .col(ColumnDef::new(Orders::DiscountId).integer().null())
                        .col(
                            ColumnDef::new(Orders::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_orders_discount_id")
                                .from(Orders::Table, Orders::DiscountId)
                                .to(Discounts::Table, Discounts::Id)
                                .on_delete(ForeignKeyAction::SetNull),
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
                .create_table(
                    Table::create()
                        .table(OrderDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderDetails::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderDetails::OrderId).integer().not_null())
                        .col(ColumnDef::new(OrderDetails::ProductId).integer().not_null())
                        .col(ColumnDef::new(OrderDetails::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderDetails::PriceAtOrder)
                                .decimal_len(15, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderDetails::SubTotal)
                                .decimal_len(15, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderDetails::Note).string().null())
                        .col(
                            ColumnDef::new(OrderDetails::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(OrderDetails::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderDetails::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_details_order_id")
                                .from(OrderDetails::Table, OrderDetails::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_details_product_id")
                                .from(OrderDetails::Table, OrderDetails::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_details_order_id")
                        .table(OrderDetails::Table)
                        .col(OrderDetails::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Payments::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Payments::OrderId).integer().not_null())
                        .col(ColumnDef::new(Payments::MethodId).integer().not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal_len(15, 2).not_null())
                        .col(
                            ColumnDef::new(Payments::PaymentDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Payments::RequestId).string().null())
                        .col(ColumnDef::new(Payments::GatewayOrderId).string().null())
                        .col(
                            ColumnDef::new(Payments::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_order_id")
                                .from(Payments::Table, Payments::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_method_id")
                                .from(Payments::Table, Payments::MethodId)
                                .to(PaymentMethods::Table, PaymentMethods::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_order_id")
                        .table(Payments::Table)
                        .col(Payments::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_gateway_order_id")
                        .table(Payments::Table)
                        .col(Payments::GatewayOrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Deposits::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Deposits::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Deposits::OrderId).integer().not_null())
                        .col(ColumnDef::new(Deposits::MethodId).integer().not_null())
                        .col(ColumnDef::new(Deposits::Amount).decimal_len(15, 2).not_null())
                        .col(
                            ColumnDef::new(Deposits::Paid)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Deposits::GatewayTransId).string().null())
                        .col(ColumnDef::new(Deposits::RequestId).string().null())
                        .col(ColumnDef::new(Deposits::GatewayOrderId).string().null())
                        .col(
                            ColumnDef::new(Deposits::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Deposits::PaidAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_deposits_order_id")
                                .from(Deposits::Table, Deposits::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_deposits_method_id")
                                .from(Deposits::Table, Deposits::MethodId)
                                .to(PaymentMethods::Table, PaymentMethods::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_deposits_order_id")
                        .table(Deposits::Table)
                        .col(Deposits::OrderId)
                        .to_owned(),
                )
                .await?;

            // Idempotency key for callback settlement
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_deposits_gateway_trans_id")
                        .table(Deposits::Table)
                        .col(Deposits::GatewayTransId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // At most one unpaid deposit per order
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_deposits_one_unpaid \
                     ON deposits (order_id) WHERE NOT paid",
                )
                .await?;
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Deposits::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderDetails::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        Total,
        DiscountAmount,
        FinalTotal,
        OrderDate,
        Status,
        ShippingStatus,
        ShippingName,
        ShippingAddress,
        ShippingPhone,
        UserId,
        DiscountId,
        IsDeleted,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderDetails {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
        PriceAtOrder,
        SubTotal,
        Note,
        IsDeleted,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        OrderId,
        MethodId,
        Amount,
        PaymentDate,
        Status,
        RequestId,
        GatewayOrderId,
        IsDeleted,
    }

    #[derive(DeriveIden)]
    enum Deposits {
        Table,
        Id,
        OrderId,
        MethodId,
        Amount,
        Paid,
        GatewayTransId,
        RequestId,
        GatewayOrderId,
        CreatedAt,
        PaidAt,
    }
}

mod m20240601_000003_seed_payment_methods {

    use super::m20240601_000001_create_catalog_tables::PaymentMethods;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_seed_payment_methods"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let insert = Query::insert()
                .into_table(PaymentMethods::Table)
                .columns([PaymentMethods::MethodName, PaymentMethods::IsDeleted])
                .values_panic(["momo".into(), false.into()])
                .values_panic(["COD".into(), false.into()])
                .to_owned();

            manager.exec_stmt(insert).await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let delete = Query::delete()
                .from_table(PaymentMethods::Table)
                .cond_where(
                    Expr::col(PaymentMethods::MethodName).is_in(["momo", "COD"]),
                )
                .to_owned();

            manager.exec_stmt(delete).await
        }
    }
}
