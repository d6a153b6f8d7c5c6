//! Initial schema: the stored-value ledger.
//!
//! - `ledger_values`: Values (gift cards, credits, promotions)
//! - `transactions`: committed transactions and their chain links
//! - `transaction_steps`: per-rail steps, ordered by `step_index`
//! - `transaction_tags`: contact identity tags

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum LedgerValues {
    Table,
    OwnerId,
    Id,
    Currency,
    Balance,
    UsesRemaining,
    Active,
    Frozen,
    Canceled,
    StartDate,
    EndDate,
    ContactId,
    Code,
    IsGenericCode,
    RedemptionRule,
    RedemptionRuleExplanation,
    ValueRule,
    ValueRuleExplanation,
    Discount,
    DiscountSellerLiability,
    Pretax,
    Metadata,
    CreatedDate,
    UpdatedDate,
}

#[derive(Iden)]
enum Transactions {
    Table,
    OwnerId,
    Id,
    TransactionType,
    Currency,
    LineItems,
    PaymentSources,
    TotalsSubtotal,
    TotalsTax,
    TotalsDiscount,
    TotalsPayable,
    TotalsRemainder,
    TotalsSellerGross,
    TotalsSellerDiscount,
    TotalsSellerNet,
    RootTransactionId,
    PreviousTransactionId,
    NextTransactionId,
    PendingVoidDate,
    Metadata,
    CreatedDate,
}

#[derive(Iden)]
enum TransactionSteps {
    Table,
    Id,
    OwnerId,
    TransactionId,
    StepIndex,
    Rail,
    ValueId,
    ContactId,
    Code,
    BalanceBefore,
    BalanceAfter,
    BalanceChange,
    UsesRemainingBefore,
    UsesRemainingAfter,
    UsesRemainingChange,
    Source,
    Customer,
    ChargeId,
    Charge,
    InternalId,
}

#[derive(Iden)]
enum TransactionTags {
    Table,
    OwnerId,
    TransactionId,
    Tag,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LedgerValues::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(LedgerValues::OwnerId).string().not_null())
                    .col(ColumnDef::new(LedgerValues::Id).string().not_null())
                    .col(ColumnDef::new(LedgerValues::Currency).string().not_null())
                    .col(ColumnDef::new(LedgerValues::Balance).big_integer())
                    .col(ColumnDef::new(LedgerValues::UsesRemaining).big_integer())
                    .col(ColumnDef::new(LedgerValues::Active).boolean().not_null())
                    .col(ColumnDef::new(LedgerValues::Frozen).boolean().not_null())
                    .col(ColumnDef::new(LedgerValues::Canceled).boolean().not_null())
                    .col(ColumnDef::new(LedgerValues::StartDate).timestamp_with_time_zone())
                    .col(ColumnDef::new(LedgerValues::EndDate).timestamp_with_time_zone())
                    .col(ColumnDef::new(LedgerValues::ContactId).string())
                    .col(ColumnDef::new(LedgerValues::Code).string())
                    .col(
                        ColumnDef::new(LedgerValues::IsGenericCode)
                            .boolean()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LedgerValues::RedemptionRule).text())
                    .col(ColumnDef::new(LedgerValues::RedemptionRuleExplanation).text())
                    .col(ColumnDef::new(LedgerValues::ValueRule).text())
                    .col(ColumnDef::new(LedgerValues::ValueRuleExplanation).text())
                    .col(ColumnDef::new(LedgerValues::Discount).boolean().not_null())
                    .col(ColumnDef::new(LedgerValues::DiscountSellerLiability).double())
                    .col(ColumnDef::new(LedgerValues::Pretax).boolean().not_null())
                    .col(ColumnDef::new(LedgerValues::Metadata).text())
                    .col(
                        ColumnDef::new(LedgerValues::CreatedDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LedgerValues::UpdatedDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(LedgerValues::OwnerId)
                            .col(LedgerValues::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-ledger_values-owner_id-code-unique")
                    .table(LedgerValues::Table)
                    .col(LedgerValues::OwnerId)
                    .col(LedgerValues::Code)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-ledger_values-owner_id-contact_id")
                    .table(LedgerValues::Table)
                    .col(LedgerValues::OwnerId)
                    .col(LedgerValues::ContactId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Transactions::OwnerId).string().not_null())
                    .col(ColumnDef::new(Transactions::Id).string().not_null())
                    .col(
                        ColumnDef::new(Transactions::TransactionType)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::Currency).string().not_null())
                    .col(ColumnDef::new(Transactions::LineItems).text())
                    .col(ColumnDef::new(Transactions::PaymentSources).text())
                    .col(ColumnDef::new(Transactions::TotalsSubtotal).big_integer())
                    .col(ColumnDef::new(Transactions::TotalsTax).big_integer())
                    .col(ColumnDef::new(Transactions::TotalsDiscount).big_integer())
                    .col(ColumnDef::new(Transactions::TotalsPayable).big_integer())
                    .col(ColumnDef::new(Transactions::TotalsRemainder).big_integer())
                    .col(ColumnDef::new(Transactions::TotalsSellerGross).big_integer())
                    .col(ColumnDef::new(Transactions::TotalsSellerDiscount).big_integer())
                    .col(ColumnDef::new(Transactions::TotalsSellerNet).big_integer())
                    .col(
                        ColumnDef::new(Transactions::RootTransactionId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::PreviousTransactionId).string())
                    .col(ColumnDef::new(Transactions::NextTransactionId).string())
                    .col(ColumnDef::new(Transactions::PendingVoidDate).timestamp_with_time_zone())
                    .col(ColumnDef::new(Transactions::Metadata).text())
                    .col(
                        ColumnDef::new(Transactions::CreatedDate)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(Transactions::OwnerId)
                            .col(Transactions::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transactions-pending_void_date")
                    .table(Transactions::Table)
                    .col(Transactions::PendingVoidDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TransactionSteps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TransactionSteps::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TransactionSteps::OwnerId).string().not_null())
                    .col(
                        ColumnDef::new(TransactionSteps::TransactionId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TransactionSteps::StepIndex)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TransactionSteps::Rail).string().not_null())
                    .col(ColumnDef::new(TransactionSteps::ValueId).string())
                    .col(ColumnDef::new(TransactionSteps::ContactId).string())
                    .col(ColumnDef::new(TransactionSteps::Code).string())
                    .col(ColumnDef::new(TransactionSteps::BalanceBefore).big_integer())
                    .col(ColumnDef::new(TransactionSteps::BalanceAfter).big_integer())
                    .col(
                        ColumnDef::new(TransactionSteps::BalanceChange)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TransactionSteps::UsesRemainingBefore).big_integer())
                    .col(ColumnDef::new(TransactionSteps::UsesRemainingAfter).big_integer())
                    .col(ColumnDef::new(TransactionSteps::UsesRemainingChange).big_integer())
                    .col(ColumnDef::new(TransactionSteps::Source).string())
                    .col(ColumnDef::new(TransactionSteps::Customer).string())
                    .col(ColumnDef::new(TransactionSteps::ChargeId).string())
                    .col(ColumnDef::new(TransactionSteps::Charge).text())
                    .col(ColumnDef::new(TransactionSteps::InternalId).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transaction_steps-transaction")
                            .from(
                                TransactionSteps::Table,
                                (TransactionSteps::OwnerId, TransactionSteps::TransactionId),
                            )
                            .to(Transactions::Table, (Transactions::OwnerId, Transactions::Id)),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transaction_steps-owner_id-transaction_id-step_index-unique")
                    .table(TransactionSteps::Table)
                    .col(TransactionSteps::OwnerId)
                    .col(TransactionSteps::TransactionId)
                    .col(TransactionSteps::StepIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transaction_steps-owner_id-value_id")
                    .table(TransactionSteps::Table)
                    .col(TransactionSteps::OwnerId)
                    .col(TransactionSteps::ValueId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TransactionTags::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TransactionTags::OwnerId).string().not_null())
                    .col(
                        ColumnDef::new(TransactionTags::TransactionId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TransactionTags::Tag).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(TransactionTags::OwnerId)
                            .col(TransactionTags::TransactionId)
                            .col(TransactionTags::Tag),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-transaction_tags-transaction")
                            .from(
                                TransactionTags::Table,
                                (TransactionTags::OwnerId, TransactionTags::TransactionId),
                            )
                            .to(Transactions::Table, (Transactions::OwnerId, Transactions::Id)),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-transaction_tags-owner_id-tag")
                    .table(TransactionTags::Table)
                    .col(TransactionTags::OwnerId)
                    .col(TransactionTags::Tag)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TransactionTags::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TransactionSteps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LedgerValues::Table).to_owned())
            .await?;
        Ok(())
    }
}
