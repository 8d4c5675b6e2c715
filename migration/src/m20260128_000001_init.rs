use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========== LWM2M TYPE CATALOG ==========
        manager
            .create_table(
                Table::create()
                    .table(Lwm2mTypes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Lwm2mTypes::Urn).string_len(256).not_null().primary_key())
                    .col(ColumnDef::new(Lwm2mTypes::Name).string_len(128).not_null())
                    .to_owned(),
            )
            .await?;

        // ========== DEVICE PROFILES ==========
        manager
            .create_table(
                Table::create()
                    .table(DeviceProfiles::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DeviceProfiles::Name).string_len(64).not_null().primary_key())
                    .col(ColumnDef::new(DeviceProfiles::Decoder).string_len(64).not_null())
                    .col(ColumnDef::new(DeviceProfiles::Interval).integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DeviceProfileTypes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DeviceProfileTypes::ProfileName).string_len(64).not_null())
                    .col(ColumnDef::new(DeviceProfileTypes::Urn).string_len(256).not_null())
                    .primary_key(
                        Index::create()
                            .col(DeviceProfileTypes::ProfileName)
                            .col(DeviceProfileTypes::Urn),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_profile_types_profile")
                            .from(DeviceProfileTypes::Table, DeviceProfileTypes::ProfileName)
                            .to(DeviceProfiles::Table, DeviceProfiles::Name)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_profile_types_urn")
                            .from(DeviceProfileTypes::Table, DeviceProfileTypes::Urn)
                            .to(Lwm2mTypes::Table, Lwm2mTypes::Urn),
                    )
                    .to_owned(),
            )
            .await?;

        // ========== DEVICES ==========
        manager
            .create_table(
                Table::create()
                    .table(Devices::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Devices::DeviceId).string_len(128).not_null().primary_key())
                    .col(ColumnDef::new(Devices::SensorId).string_len(128).not_null())
                    .col(ColumnDef::new(Devices::Tenant).string_len(64).not_null())
                    .col(ColumnDef::new(Devices::Active).boolean().not_null().default(true))
                    .col(ColumnDef::new(Devices::Name).string_len(128).not_null())
                    .col(ColumnDef::new(Devices::Description).text())
                    .col(ColumnDef::new(Devices::Environment).string_len(16).not_null().default(""))
                    .col(ColumnDef::new(Devices::Source).string_len(64))
                    .col(ColumnDef::new(Devices::Latitude).double())
                    .col(ColumnDef::new(Devices::Longitude).double())
                    .col(ColumnDef::new(Devices::DeviceProfileName).string_len(64).not_null())
                    .col(ColumnDef::new(Devices::IntervalOverride).integer())
                    .col(ColumnDef::new(Devices::BatteryLevel).integer().not_null().default(-1))
                    .col(ColumnDef::new(Devices::Rssi).integer())
                    .col(ColumnDef::new(Devices::Snr).double())
                    .col(ColumnDef::new(Devices::Frequency).double())
                    .col(ColumnDef::new(Devices::SpreadingFactor).integer())
                    .col(ColumnDef::new(Devices::Dr).integer())
                    .col(ColumnDef::new(Devices::StatusObservedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Devices::Online).boolean().not_null().default(false))
                    .col(ColumnDef::new(Devices::State).small_integer().not_null().default(-1))
                    .col(ColumnDef::new(Devices::StateObservedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Devices::Deleted).boolean().not_null().default(false))
                    .col(ColumnDef::new(Devices::DeletedOn).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_devices_profile")
                            .from(Devices::Table, Devices::DeviceProfileName)
                            .to(DeviceProfiles::Table, DeviceProfiles::Name),
                    )
                    .to_owned(),
            )
            .await?;

        // sensorID unique only among non-deleted devices (spec §3)
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX devices_sensor_id_idx ON devices (sensor_id) WHERE NOT deleted",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("devices_tenant_idx")
                    .table(Devices::Table)
                    .col(Devices::Tenant)
                    .to_owned(),
            )
            .await?;

        // ========== DEVICE TYPES (per-device lwm2mTypes set) ==========
        manager
            .create_table(
                Table::create()
                    .table(DeviceTypes::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DeviceTypes::DeviceId).string_len(128).not_null())
                    .col(ColumnDef::new(DeviceTypes::Urn).string_len(256).not_null())
                    .primary_key(Index::create().col(DeviceTypes::DeviceId).col(DeviceTypes::Urn))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_device_types_device")
                            .from(DeviceTypes::Table, DeviceTypes::DeviceId)
                            .to(Devices::Table, Devices::DeviceId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ========== DEVICE TAGS ==========
        manager
            .create_table(
                Table::create()
                    .table(DeviceTags::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DeviceTags::DeviceId).string_len(128).not_null())
                    .col(ColumnDef::new(DeviceTags::Tag).string_len(64).not_null())
                    .primary_key(Index::create().col(DeviceTags::DeviceId).col(DeviceTags::Tag))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_device_tags_device")
                            .from(DeviceTags::Table, DeviceTags::DeviceId)
                            .to(Devices::Table, Devices::DeviceId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ========== DEVICE STATUS HISTORY (bounded, 3 weeks) ==========
        manager
            .create_table(
                Table::create()
                    .table(DeviceStatusHistory::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DeviceStatusHistory::DeviceId).string_len(128).not_null())
                    .col(
                        ColumnDef::new(DeviceStatusHistory::ObservedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeviceStatusHistory::BatteryLevel).integer().not_null())
                    .col(ColumnDef::new(DeviceStatusHistory::Rssi).integer())
                    .col(ColumnDef::new(DeviceStatusHistory::Snr).double())
                    .col(ColumnDef::new(DeviceStatusHistory::Frequency).double())
                    .col(ColumnDef::new(DeviceStatusHistory::SpreadingFactor).integer())
                    .col(ColumnDef::new(DeviceStatusHistory::Dr).integer())
                    .primary_key(
                        Index::create()
                            .col(DeviceStatusHistory::DeviceId)
                            .col(DeviceStatusHistory::ObservedAt),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_status_history_device")
                            .from(DeviceStatusHistory::Table, DeviceStatusHistory::DeviceId)
                            .to(Devices::Table, Devices::DeviceId)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // ========== ALARMS ==========
        manager
            .create_table(
                Table::create()
                    .table(Alarms::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alarms::Id)
                            .uuid()
                            .not_null()
                            .primary_key()
                            .extra("DEFAULT gen_random_uuid()"),
                    )
                    .col(ColumnDef::new(Alarms::RefId).string_len(128).not_null())
                    .col(ColumnDef::new(Alarms::AlarmType).string_len(64).not_null())
                    .col(ColumnDef::new(Alarms::Description).text().not_null())
                    .col(ColumnDef::new(Alarms::Severity).small_integer().not_null())
                    .col(ColumnDef::new(Alarms::ObservedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Alarms::Tenant).string_len(64).not_null())
                    .col(ColumnDef::new(Alarms::Deleted).boolean().not_null().default(false))
                    .col(ColumnDef::new(Alarms::DeletedOn).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // At most one open alarm per (refID, alarmType, tenant) — spec §3.
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX alarms_open_key_idx \
                 ON alarms (ref_id, alarm_type, tenant) WHERE NOT deleted",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("alarms_ref_id_idx")
                    .table(Alarms::Table)
                    .col(Alarms::RefId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Alarms::Table).to_owned()).await?;
        manager
            .drop_table(Table::drop().table(DeviceStatusHistory::Table).to_owned())
            .await?;
        manager.drop_table(Table::drop().table(DeviceTags::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(DeviceTypes::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Devices::Table).to_owned()).await?;
        manager
            .drop_table(Table::drop().table(DeviceProfileTypes::Table).to_owned())
            .await?;
        manager.drop_table(Table::drop().table(DeviceProfiles::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Lwm2mTypes::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Lwm2mTypes {
    Table,
    Urn,
    Name,
}

#[derive(DeriveIden)]
enum DeviceProfiles {
    Table,
    Name,
    Decoder,
    Interval,
}

#[derive(DeriveIden)]
enum DeviceProfileTypes {
    Table,
    ProfileName,
    Urn,
}

#[derive(DeriveIden)]
enum Devices {
    Table,
    DeviceId,
    SensorId,
    Tenant,
    Active,
    Name,
    Description,
    Environment,
    Source,
    Latitude,
    Longitude,
    DeviceProfileName,
    IntervalOverride,
    BatteryLevel,
    Rssi,
    Snr,
    Frequency,
    SpreadingFactor,
    Dr,
    StatusObservedAt,
    Online,
    State,
    StateObservedAt,
    Deleted,
    DeletedOn,
}

#[derive(DeriveIden)]
enum DeviceTypes {
    Table,
    DeviceId,
    Urn,
}

#[derive(DeriveIden)]
enum DeviceTags {
    Table,
    DeviceId,
    Tag,
}

#[derive(DeriveIden)]
enum DeviceStatusHistory {
    Table,
    DeviceId,
    ObservedAt,
    BatteryLevel,
    Rssi,
    Snr,
    Frequency,
    SpreadingFactor,
    Dr,
}

#[derive(DeriveIden)]
enum Alarms {
    Table,
    Id,
    RefId,
    AlarmType,
    Description,
    Severity,
    ObservedAt,
    Tenant,
    Deleted,
    DeletedOn,
}
