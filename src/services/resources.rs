//! Plain CRUD resources: groups, streams and tariffs share one service.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::db::{Db, Document};
use crate::error::{AppError, Result};
use crate::models::{parse_id, parse_opt_id, Course, Group, Stream, Tariff};

pub trait Resource: Document + Clone {
    /// Entity name used in errors and logs.
    const NAME: &'static str;
    type Create: DeserializeOwned + Send + 'static;
    type Update: DeserializeOwned + Send + 'static;

    fn build(req: Self::Create, id: Uuid, now: DateTime<Utc>) -> Result<Self>;
    fn apply(&mut self, req: Self::Update) -> Result<()>;

    /// Course this resource points at, checked for existence on write.
    fn course_ref(&self) -> Option<Uuid> {
        None
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn parse_ids(field: &'static str, values: &[String]) -> Result<Vec<Uuid>> {
    let mut ids: Vec<Uuid> = Vec::with_capacity(values.len());
    for v in values {
        let id = parse_id(field, v)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

// ----- groups -----

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupReq {
    pub name: String,
    pub course_id: Option<String>,
    pub teacher_id: Option<String>,
    #[serde(default)]
    pub student_ids: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupReq {
    pub name: Option<String>,
    pub course_id: Option<String>,
    pub teacher_id: Option<String>,
    pub student_ids: Option<Vec<String>>,
}

impl Resource for Group {
    const NAME: &'static str = "group";
    type Create = CreateGroupReq;
    type Update = UpdateGroupReq;

    fn build(req: CreateGroupReq, id: Uuid, now: DateTime<Utc>) -> Result<Self> {
        Ok(Group {
            id,
            name: required("name", &req.name)?,
            course_id: parse_opt_id("courseId", req.course_id.as_deref())?,
            teacher_id: parse_opt_id("teacherId", req.teacher_id.as_deref())?,
            student_ids: parse_ids("studentIds", &req.student_ids)?,
            created_at: now,
        })
    }

    fn apply(&mut self, req: UpdateGroupReq) -> Result<()> {
        if let Some(name) = req.name {
            self.name = required("name", &name)?;
        }
        if let Some(course) = parse_opt_id("courseId", req.course_id.as_deref())? {
            self.course_id = Some(course);
        }
        if let Some(teacher) = parse_opt_id("teacherId", req.teacher_id.as_deref())? {
            self.teacher_id = Some(teacher);
        }
        if let Some(students) = req.student_ids {
            self.student_ids = parse_ids("studentIds", &students)?;
        }
        Ok(())
    }

    fn course_ref(&self) -> Option<Uuid> {
        self.course_id
    }
}

// ----- streams -----

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreamReq {
    pub course_id: String,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStreamReq {
    pub name: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl Stream {
    fn check_window(&self) -> Result<()> {
        match self.ends_at {
            Some(end) if end <= self.starts_at => {
                Err(AppError::validation("endsAt must be after startsAt"))
            }
            _ => Ok(()),
        }
    }
}

impl Resource for Stream {
    const NAME: &'static str = "stream";
    type Create = CreateStreamReq;
    type Update = UpdateStreamReq;

    fn build(req: CreateStreamReq, id: Uuid, now: DateTime<Utc>) -> Result<Self> {
        let stream = Stream {
            id,
            course_id: parse_id("courseId", &req.course_id)?,
            name: required("name", &req.name)?,
            starts_at: req.starts_at,
            ends_at: req.ends_at,
            created_at: now,
        };
        stream.check_window()?;
        Ok(stream)
    }

    fn apply(&mut self, req: UpdateStreamReq) -> Result<()> {
        if let Some(name) = req.name {
            self.name = required("name", &name)?;
        }
        if let Some(starts_at) = req.starts_at {
            self.starts_at = starts_at;
        }
        if let Some(ends_at) = req.ends_at {
            self.ends_at = Some(ends_at);
        }
        self.check_window()
    }

    fn course_ref(&self) -> Option<Uuid> {
        Some(self.course_id)
    }
}

// ----- tariffs -----

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateTariffReq {
    pub name: String,
    pub price: u64,
    pub currency: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    pub duration_days: Option<u32>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTariffReq {
    pub name: Option<String>,
    pub price: Option<u64>,
    pub currency: Option<String>,
    pub features: Option<Vec<String>>,
    pub duration_days: Option<u32>,
    pub is_active: Option<bool>,
}

fn currency(code: &str) -> Result<String> {
    let code = code.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation("currency must be a 3-letter code"));
    }
    Ok(code)
}

impl Resource for Tariff {
    const NAME: &'static str = "tariff";
    type Create = CreateTariffReq;
    type Update = UpdateTariffReq;

    fn build(req: CreateTariffReq, id: Uuid, now: DateTime<Utc>) -> Result<Self> {
        Ok(Tariff {
            id,
            name: required("name", &req.name)?,
            price: req.price,
            currency: currency(req.currency.as_deref().unwrap_or("USD"))?,
            features: req.features,
            duration_days: req.duration_days,
            is_active: req.is_active.unwrap_or(true),
            created_at: now,
        })
    }

    fn apply(&mut self, req: UpdateTariffReq) -> Result<()> {
        if let Some(name) = req.name {
            self.name = required("name", &name)?;
        }
        if let Some(price) = req.price {
            self.price = price;
        }
        if let Some(code) = req.currency {
            self.currency = currency(&code)?;
        }
        if let Some(features) = req.features {
            self.features = features;
        }
        if let Some(days) = req.duration_days {
            self.duration_days = Some(days);
        }
        if let Some(active) = req.is_active {
            self.is_active = active;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ResourceService {
    db: Db,
    clock: SharedClock,
}

impl ResourceService {
    pub fn new(db: Db, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    async fn check_course<R: Resource>(&self, item: &R) -> Result<()> {
        if let Some(course_id) = item.course_ref() {
            if self.db.get::<Course>(course_id).await?.is_none() {
                return Err(AppError::not_found("course", course_id));
            }
        }
        Ok(())
    }

    pub async fn create<R: Resource>(&self, req: R::Create) -> Result<R> {
        let item = R::build(req, Uuid::new_v4(), self.clock.now())?;
        self.check_course(&item).await?;
        self.db.insert(&item).await?;
        tracing::info!(kind = R::NAME, id = %item.id(), "resource created");
        Ok(item)
    }

    pub async fn list<R: Resource>(&self) -> Result<Vec<R>> {
        Ok(self.db.find::<R>(json!({})).await?)
    }

    pub async fn get<R: Resource>(&self, id: &str) -> Result<R> {
        let id = parse_id("id", id)?;
        self.db
            .get::<R>(id)
            .await?
            .ok_or_else(|| AppError::not_found(R::NAME, id))
    }

    pub async fn update<R: Resource>(&self, id: &str, req: R::Update) -> Result<R> {
        let mut item = self.get::<R>(id).await?;
        let before = item.course_ref();
        item.apply(req)?;
        if item.course_ref() != before {
            self.check_course(&item).await?;
        }
        self.db.save(&item).await?;
        Ok(item)
    }

    pub async fn delete<R: Resource>(&self, id: &str) -> Result<()> {
        let id = parse_id("id", id)?;
        if !self.db.delete::<R>(id).await? {
            return Err(AppError::not_found(R::NAME, id));
        }
        tracing::info!(kind = R::NAME, %id, "resource deleted");
        Ok(())
    }
}
