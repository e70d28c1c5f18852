use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait, sea_query::OnConflict,
};
use uuid::Uuid;

use chime_domain::recurrence::Recurring;
use chime_scheduler_schema::events;

use crate::domain::repository::EventRepository;
use crate::domain::types::{Event, EventChanges, EventFilter};
use crate::error::SchedulerServiceError;

#[derive(Clone)]
pub struct DbEventRepository {
    pub db: DatabaseConnection,
}

impl EventRepository for DbEventRepository {
    async fn find_one(&self, slug: &str, key: &str) -> Result<Option<Event>, SchedulerServiceError> {
        let model = events::Entity::find()
            .filter(events::Column::Slug.eq(slug))
            .filter(events::Column::Key.eq(key))
            .one(&self.db)
            .await
            .context("find event")?;
        let event = model
            .map(event_from_model)
            .transpose()
            .context("decode event")?;
        Ok(event)
    }

    async fn find_range(&self, filter: &EventFilter) -> Result<Vec<Event>, SchedulerServiceError> {
        let mut query = events::Entity::find().filter(events::Column::Failed.eq(filter.failed));
        if let Some(slug) = &filter.slug {
            query = query.filter(events::Column::Slug.eq(slug.as_str()));
        }
        if let Some(before) = filter.before {
            query = query.filter(events::Column::RunAt.lte(before));
        }
        if let Some(after) = filter.after {
            query = query.filter(events::Column::RunAt.gte(after));
        }
        let models = query
            .order_by_asc(events::Column::RunAt)
            .all(&self.db)
            .await
            .context("list events")?;
        let events = models
            .into_iter()
            .map(event_from_model)
            .collect::<Result<Vec<_>, _>>()
            .context("decode events")?;
        Ok(events)
    }

    async fn upsert(&self, event: &Event, changes: &EventChanges) -> Result<Event, SchedulerServiceError> {
        let event = event.clone();
        let changes = changes.clone();
        let stored = self
            .db
            .transaction::<_, Event, DbErr>(|txn| {
                Box::pin(async move {
                    let existing = find_locked(txn, &event.slug, &event.key).await?;

                    let now = Utc::now();
                    let (id, created_at, mut merged) = match existing {
                        Some(model) => (model.id, model.created_at, event_from_model(model)?),
                        None => (Uuid::now_v7(), now, event),
                    };
                    merged.apply(&changes);

                    events::Entity::insert(active_model(&merged, id, created_at, now)?)
                        .on_conflict(
                            OnConflict::columns([events::Column::Slug, events::Column::Key])
                                .update_columns([
                                    events::Column::Request,
                                    events::Column::RunAt,
                                    events::Column::Recurring,
                                    events::Column::Failed,
                                    events::Column::FailedCode,
                                    events::Column::FailedResponse,
                                    events::Column::UpdatedAt,
                                ])
                                .to_owned(),
                        )
                        .exec_without_returning(txn)
                        .await?;
                    Ok(merged)
                })
            })
            .await
            .context("upsert event")?;
        Ok(stored)
    }

    async fn update(&self, event: &Event, changes: &EventChanges) -> Result<Option<Event>, SchedulerServiceError> {
        let slug = event.slug.clone();
        let key = event.key.clone();
        let changes = changes.clone();
        let stored = self
            .db
            .transaction::<_, Option<Event>, DbErr>(|txn| {
                Box::pin(async move {
                    let Some(model) = find_locked(txn, &slug, &key).await? else {
                        return Ok(None);
                    };
                    let (id, created_at) = (model.id, model.created_at);
                    let mut merged = event_from_model(model)?;
                    merged.apply(&changes);

                    events::Entity::update(active_model(&merged, id, created_at, Utc::now())?)
                        .exec(txn)
                        .await?;
                    Ok(Some(merged))
                })
            })
            .await
            .context("update event")?;
        Ok(stored)
    }

    async fn remove(&self, slug: &str, key: &str) -> Result<bool, SchedulerServiceError> {
        let result = events::Entity::delete_many()
            .filter(events::Column::Slug.eq(slug))
            .filter(events::Column::Key.eq(key))
            .exec(&self.db)
            .await
            .context("delete event")?;
        Ok(result.rows_affected > 0)
    }
}

/// Select the row for `(slug, key)` with `FOR UPDATE`.
async fn find_locked(
    txn: &DatabaseTransaction,
    slug: &str,
    key: &str,
) -> Result<Option<events::Model>, DbErr> {
    events::Entity::find()
        .filter(events::Column::Slug.eq(slug))
        .filter(events::Column::Key.eq(key))
        .lock_exclusive()
        .one(txn)
        .await
}

fn event_from_model(model: events::Model) -> Result<Event, DbErr> {
    let request = serde_json::from_value(model.request)
        .map_err(|e| DbErr::Custom(format!("invalid request column: {e}")))?;
    let recurring = match model.recurring {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| DbErr::Custom(format!("invalid recurring column: {e}")))?,
        None => Recurring::Never,
    };
    Ok(Event {
        slug: model.slug,
        key: model.key,
        request,
        run_at: model.run_at,
        recurring,
        failed: model.failed,
        failed_code: model.failed_code,
        failed_response: model.failed_response,
    })
}

fn active_model(
    event: &Event,
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Result<events::ActiveModel, DbErr> {
    let request = serde_json::to_value(&event.request)
        .map_err(|e| DbErr::Custom(format!("encode request: {e}")))?;
    let recurring = event
        .recurring
        .rule()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| DbErr::Custom(format!("encode recurring: {e}")))?;
    Ok(events::ActiveModel {
        id: Set(id),
        slug: Set(event.slug.clone()),
        key: Set(event.key.clone()),
        request: Set(request),
        run_at: Set(event.run_at),
        recurring: Set(recurring),
        failed: Set(event.failed),
        failed_code: Set(event.failed_code),
        failed_response: Set(event.failed_response.clone()),
        created_at: Set(created_at),
        updated_at: Set(updated_at),
    })
}
