use sea_orm_migration::prelude::*;

/// Tenants and their append-only provisioning audit trail
#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("tenants"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Alias::new("name")).string().not_null())
                    .col(
                        ColumnDef::new(Alias::new("merchant_email"))
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("subdomain")).string().null())
                    .col(ColumnDef::new(Alias::new("database_url")).text().null())
                    .col(ColumnDef::new(Alias::new("api_url")).string().null())
                    .col(ColumnDef::new(Alias::new("redis_hash")).string().null())
                    .col(
                        ColumnDef::new(Alias::new("status"))
                            .string()
                            .not_null()
                            .default("provisioning"),
                    )
                    .col(
                        ColumnDef::new(Alias::new("plan"))
                            .string()
                            .not_null()
                            .default("free"),
                    )
                    .col(ColumnDef::new(Alias::new("jwt_secret")).string().not_null())
                    .col(
                        ColumnDef::new(Alias::new("cookie_secret"))
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("current_image_tag"))
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("release_channel"))
                            .string()
                            .not_null()
                            .default("stable"),
                    )
                    .col(ColumnDef::new(Alias::new("failure_reason")).text().null())
                    .col(ColumnDef::new(Alias::new("metadata")).json_binary().null())
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("updated_at"))
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("deleted_at"))
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Subdomains may be reused once the previous owner is deleted
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_tenants_subdomain_live \
                 ON tenants (subdomain) WHERE deleted_at IS NULL",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenants_status_channel")
                    .table(Alias::new("tenants"))
                    .col(Alias::new("status"))
                    .col(Alias::new("release_channel"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Alias::new("tenant_provisioning_events"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Alias::new("tenant_id")).uuid().not_null())
                    .col(ColumnDef::new(Alias::new("step")).string().not_null())
                    .col(ColumnDef::new(Alias::new("status")).string().not_null())
                    .col(ColumnDef::new(Alias::new("details")).json_binary().null())
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tenant_provisioning_events_tenant_id")
                            .from(
                                Alias::new("tenant_provisioning_events"),
                                Alias::new("tenant_id"),
                            )
                            .to(Alias::new("tenants"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tenant_provisioning_events_tenant_id")
                    .table(Alias::new("tenant_provisioning_events"))
                    .col(Alias::new("tenant_id"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(Alias::new("tenant_provisioning_events"))
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Alias::new("tenants")).to_owned())
            .await?;

        Ok(())
    }
}
