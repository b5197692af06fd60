//! Paginated admin listings with exact-match filters.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::db::{Db, Document, Page};
use crate::error::Result;
use crate::models::{
    parse_opt_id, Activity, ActivityKind, Course, Enrollment, Notification, Paginated, PublicUser,
    Role, User,
};

pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub role: Option<Role>,
    pub course_id: Option<String>,
    pub student_id: Option<String>,
    pub user_id: Option<String>,
    pub is_read: Option<bool>,
    pub is_completed: Option<bool>,
    pub is_published: Option<bool>,
    pub kind: Option<ActivityKind>,
}

impl PageQuery {
    /// `(page, limit)` with page ≥ 1 and limit in 1..=100.
    pub fn window(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        (page, limit)
    }
}

/// Builds a containment filter from the fields that are set.
#[derive(Default)]
struct Filter(Map<String, Value>);

impl Filter {
    fn with(mut self, key: &str, value: Option<impl Into<Value>>) -> Self {
        if let Some(v) = value {
            self.0.insert(key.to_string(), v.into());
        }
        self
    }

    fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn id_value(field: &'static str, raw: Option<&str>) -> Result<Option<String>> {
    Ok(parse_opt_id(field, raw)?.map(|id| id.to_string()))
}

#[derive(Clone)]
pub struct AdminService {
    db: Db,
}

impl AdminService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn page<T: Document>(&self, filter: Filter, q: &PageQuery) -> Result<Paginated<T>> {
        let (page, limit) = q.window();
        let (data, total) = self
            .db
            .page::<T>(
                filter.into_value(),
                Page {
                    offset: (page - 1) * limit,
                    limit,
                },
            )
            .await?;
        Ok(Paginated::new(data, total, page, limit))
    }

    pub async fn users(&self, q: &PageQuery) -> Result<Paginated<PublicUser>> {
        let filter = Filter::default().with("role", q.role.map(|r| r.as_str()));
        let users = self.page::<User>(filter, q).await?;
        Ok(Paginated::new(
            users.data.into_iter().map(PublicUser::from).collect(),
            users.total,
            users.page,
            users.limit,
        ))
    }

    pub async fn courses(&self, q: &PageQuery) -> Result<Paginated<Course>> {
        let filter = Filter::default().with("isPublished", q.is_published);
        self.page(filter, q).await
    }

    pub async fn enrollments(&self, q: &PageQuery) -> Result<Paginated<Enrollment>> {
        let filter = Filter::default()
            .with("courseId", id_value("courseId", q.course_id.as_deref())?)
            .with("studentId", id_value("studentId", q.student_id.as_deref())?)
            .with("isCompleted", q.is_completed);
        self.page(filter, q).await
    }

    pub async fn notifications(&self, q: &PageQuery) -> Result<Paginated<Notification>> {
        let filter = Filter::default()
            .with("userId", id_value("userId", q.user_id.as_deref())?)
            .with("isRead", q.is_read);
        self.page(filter, q).await
    }

    pub async fn activity(&self, q: &PageQuery) -> Result<Paginated<Activity>> {
        let kind = q
            .kind
            .map(|k| serde_json::to_value(k).unwrap_or(Value::Null));
        let filter = Filter::default()
            .with("courseId", id_value("courseId", q.course_id.as_deref())?)
            .with("userId", id_value("userId", q.user_id.as_deref())?)
            .with("kind", kind);
        self.page(filter, q).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::testing::TestEnv;

    #[test]
    fn window_defaults_and_clamps() {
        assert_eq!(PageQuery::default().window(), (1, 10));
        let q = PageQuery {
            page: Some(0),
            limit: Some(1000),
            ..Default::default()
        };
        assert_eq!(q.window(), (1, 100));
        let q = PageQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(q.window(), (1, 1));
    }

    #[tokio::test]
    async fn users_page_and_filter_by_role() {
        let env = TestEnv::new();
        for i in 0..12 {
            env.user(&format!("p{i}@example.com")).await;
        }
        env.teacher("t@example.com").await;

        let first = env.admin.users(&PageQuery::default()).await.unwrap();
        assert_eq!(first.total, 13);
        assert_eq!(first.data.len(), 10);
        assert_eq!(first.total_pages, 2);

        let second = env
            .admin
            .users(&PageQuery {
                page: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second.data.len(), 3);

        let teachers = env
            .admin
            .users(&PageQuery {
                role: Some(Role::Teacher),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(teachers.total, 1);
        assert_eq!(teachers.data[0].email, "t@example.com");
    }

    #[tokio::test]
    async fn enrollment_filters_validate_ids() {
        let env = TestEnv::new();
        let err = env
            .admin
            .enrollments(&PageQuery {
                course_id: Some("nope".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidIdentifier { field: "courseId", .. }));

        let student = env.user("e@example.com").await;
        let (course, _, _) = env.course_tree(1, 1).await;
        env.enroll(&student, &course).await;
        let page = env
            .admin
            .enrollments(&PageQuery {
                course_id: Some(course.id.to_string()),
                is_completed: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }
}
