//! Course → module → lesson tree, and the read-only lookup the progress core
//! uses for totals and titles.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::db::{Db, StoreError};
use crate::error::{AppError, Result};
use crate::models::{parse_id, parse_opt_id, Course, CourseModule, Lesson};

#[derive(Debug, Clone, PartialEq)]
pub struct CourseSummary {
    pub course_id: Uuid,
    pub title: String,
    pub total_modules: u64,
    pub total_lessons: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LessonPath {
    pub course_title: String,
    pub module_title: String,
    pub lesson_title: String,
}

/// What enrollments need to know about courses, without a dependency on the
/// full course service.
#[async_trait]
pub trait CourseLookup: Send + Sync {
    async fn summary(&self, course_id: Uuid) -> std::result::Result<Option<CourseSummary>, StoreError>;

    /// Titles along the path, or `None` unless the lesson belongs to the
    /// module and the module to the course.
    async fn lesson_path(
        &self,
        course_id: Uuid,
        module_id: Uuid,
        lesson_id: Uuid,
    ) -> std::result::Result<Option<LessonPath>, StoreError>;
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseReq {
    pub title: String,
    pub description: Option<String>,
    pub teacher_id: Option<String>,
    pub is_published: Option<bool>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCourseReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub teacher_id: Option<String>,
    pub is_published: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateModuleReq {
    pub title: String,
    pub description: Option<String>,
    pub position: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModuleReq {
    pub title: Option<String>,
    pub description: Option<String>,
    pub position: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateLessonReq {
    pub title: String,
    pub content: Option<String>,
    pub position: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLessonReq {
    pub title: Option<String>,
    pub content: Option<String>,
    pub position: Option<u32>,
}

fn required_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::validation("title is required"));
    }
    Ok(title.to_string())
}

#[derive(Clone)]
pub struct CourseService {
    db: Db,
    clock: SharedClock,
}

impl CourseService {
    pub fn new(db: Db, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    // ----- courses -----

    pub async fn create_course(&self, req: CreateCourseReq, created_by: Uuid) -> Result<Course> {
        let course = Course {
            id: Uuid::new_v4(),
            title: required_title(&req.title)?,
            description: req.description,
            teacher_id: Some(parse_opt_id("teacherId", req.teacher_id.as_deref())?.unwrap_or(created_by)),
            is_published: req.is_published.unwrap_or(false),
            created_at: self.clock.now(),
        };
        self.db.insert(&course).await?;
        tracing::info!(course_id = %course.id, "course created");
        Ok(course)
    }

    pub async fn list_courses(&self, published_only: bool) -> Result<Vec<Course>> {
        let filter = if published_only {
            json!({ "isPublished": true })
        } else {
            json!({})
        };
        Ok(self.db.find::<Course>(filter).await?)
    }

    pub async fn get_course(&self, id: &str) -> Result<Course> {
        let id = parse_id("courseId", id)?;
        self.db
            .get::<Course>(id)
            .await?
            .ok_or_else(|| AppError::not_found("course", id))
    }

    pub async fn update_course(&self, id: &str, req: UpdateCourseReq) -> Result<Course> {
        let mut course = self.get_course(id).await?;
        if let Some(title) = req.title {
            course.title = required_title(&title)?;
        }
        if let Some(description) = req.description {
            course.description = Some(description);
        }
        if let Some(teacher) = parse_opt_id("teacherId", req.teacher_id.as_deref())? {
            course.teacher_id = Some(teacher);
        }
        if let Some(published) = req.is_published {
            course.is_published = published;
        }
        self.db.save(&course).await?;
        Ok(course)
    }

    /// Removes the course with all of its modules and lessons.
    pub async fn delete_course(&self, id: &str) -> Result<()> {
        let course = self.get_course(id).await?;
        let lessons = self
            .db
            .delete_where::<Lesson>(json!({ "courseId": course.id }))
            .await?;
        let modules = self
            .db
            .delete_where::<CourseModule>(json!({ "courseId": course.id }))
            .await?;
        self.db.delete::<Course>(course.id).await?;
        tracing::info!(course_id = %course.id, modules, lessons, "course deleted");
        Ok(())
    }

    // ----- modules -----

    pub async fn create_module(&self, course_id: &str, req: CreateModuleReq) -> Result<CourseModule> {
        let course = self.get_course(course_id).await?;
        let position = match req.position {
            Some(p) => p,
            None => self
                .db
                .count::<CourseModule>(json!({ "courseId": course.id }))
                .await? as u32,
        };
        let module = CourseModule {
            id: Uuid::new_v4(),
            course_id: course.id,
            title: required_title(&req.title)?,
            description: req.description,
            position,
            created_at: self.clock.now(),
        };
        self.db.insert(&module).await?;
        Ok(module)
    }

    pub async fn list_modules(&self, course_id: &str) -> Result<Vec<CourseModule>> {
        let course_id = parse_id("courseId", course_id)?;
        let mut modules = self
            .db
            .find::<CourseModule>(json!({ "courseId": course_id }))
            .await?;
        modules.sort_by_key(|m| (m.position, m.created_at));
        Ok(modules)
    }

    pub async fn get_module(&self, id: &str) -> Result<CourseModule> {
        let id = parse_id("moduleId", id)?;
        self.db
            .get::<CourseModule>(id)
            .await?
            .ok_or_else(|| AppError::not_found("module", id))
    }

    pub async fn update_module(&self, id: &str, req: UpdateModuleReq) -> Result<CourseModule> {
        let mut module = self.get_module(id).await?;
        if let Some(title) = req.title {
            module.title = required_title(&title)?;
        }
        if let Some(description) = req.description {
            module.description = Some(description);
        }
        if let Some(position) = req.position {
            module.position = position;
        }
        self.db.save(&module).await?;
        Ok(module)
    }

    pub async fn delete_module(&self, id: &str) -> Result<()> {
        let module = self.get_module(id).await?;
        self.db
            .delete_where::<Lesson>(json!({ "moduleId": module.id }))
            .await?;
        self.db.delete::<CourseModule>(module.id).await?;
        Ok(())
    }

    // ----- lessons -----

    pub async fn create_lesson(&self, module_id: &str, req: CreateLessonReq) -> Result<Lesson> {
        let module = self.get_module(module_id).await?;
        let position = match req.position {
            Some(p) => p,
            None => self
                .db
                .count::<Lesson>(json!({ "moduleId": module.id }))
                .await? as u32,
        };
        let lesson = Lesson {
            id: Uuid::new_v4(),
            course_id: module.course_id,
            module_id: module.id,
            title: required_title(&req.title)?,
            content: req.content,
            position,
            created_at: self.clock.now(),
        };
        self.db.insert(&lesson).await?;
        Ok(lesson)
    }

    pub async fn list_lessons(&self, module_id: &str) -> Result<Vec<Lesson>> {
        let module_id = parse_id("moduleId", module_id)?;
        let mut lessons = self
            .db
            .find::<Lesson>(json!({ "moduleId": module_id }))
            .await?;
        lessons.sort_by_key(|l| (l.position, l.created_at));
        Ok(lessons)
    }

    pub async fn get_lesson(&self, id: &str) -> Result<Lesson> {
        let id = parse_id("lessonId", id)?;
        self.db
            .get::<Lesson>(id)
            .await?
            .ok_or_else(|| AppError::not_found("lesson", id))
    }

    pub async fn update_lesson(&self, id: &str, req: UpdateLessonReq) -> Result<Lesson> {
        let mut lesson = self.get_lesson(id).await?;
        if let Some(title) = req.title {
            lesson.title = required_title(&title)?;
        }
        if let Some(content) = req.content {
            lesson.content = Some(content);
        }
        if let Some(position) = req.position {
            lesson.position = position;
        }
        self.db.save(&lesson).await?;
        Ok(lesson)
    }

    pub async fn delete_lesson(&self, id: &str) -> Result<()> {
        let lesson = self.get_lesson(id).await?;
        self.db.delete::<Lesson>(lesson.id).await?;
        Ok(())
    }
}

#[async_trait]
impl CourseLookup for CourseService {
    async fn summary(&self, course_id: Uuid) -> std::result::Result<Option<CourseSummary>, StoreError> {
        let Some(course) = self.db.get::<Course>(course_id).await? else {
            return Ok(None);
        };
        let total_modules = self
            .db
            .count::<CourseModule>(json!({ "courseId": course_id }))
            .await?;
        let total_lessons = self
            .db
            .count::<Lesson>(json!({ "courseId": course_id }))
            .await?;
        Ok(Some(CourseSummary {
            course_id,
            title: course.title,
            total_modules,
            total_lessons,
        }))
    }

    async fn lesson_path(
        &self,
        course_id: Uuid,
        module_id: Uuid,
        lesson_id: Uuid,
    ) -> std::result::Result<Option<LessonPath>, StoreError> {
        let Some(lesson) = self.db.get::<Lesson>(lesson_id).await? else {
            return Ok(None);
        };
        if lesson.module_id != module_id || lesson.course_id != course_id {
            return Ok(None);
        }
        let Some(module) = self.db.get::<CourseModule>(module_id).await? else {
            return Ok(None);
        };
        let Some(course) = self.db.get::<Course>(course_id).await? else {
            return Ok(None);
        };
        Ok(Some(LessonPath {
            course_title: course.title,
            module_title: module.title,
            lesson_title: lesson.title,
        }))
    }
}
