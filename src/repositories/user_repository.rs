use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::user::{self, Entity as User, Model as UserModel};
use crate::errors::ServiceError;

use super::{BaseRepository, Repository, UserRepository};

/// sea-orm backed user lookup
#[derive(Debug, Clone)]
pub struct SeaOrmUserRepository {
    base: BaseRepository,
}

impl SeaOrmUserRepository {
    pub fn new(db: Arc<sea_orm::DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl UserRepository for SeaOrmUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserModel>, ServiceError> {
        Ok(User::find_by_id(id).one(self.base.get_db()).await?)
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserModel>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(User::find()
            .filter(user::Column::Id.is_in(ids.iter().copied()))
            .all(self.base.get_db())
            .await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserModel>, ServiceError> {
        Ok(User::find()
            .filter(user::Column::Email.eq(email.trim().to_lowercase()))
            .one(self.base.get_db())
            .await?)
    }

    async fn create(
        &self,
        name: &str,
        email: &str,
        is_admin: bool,
    ) -> Result<UserModel, ServiceError> {
        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.trim().to_string()),
            email: Set(email.trim().to_lowercase()),
            is_admin: Set(is_admin),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(self.base.get_db()).await.map_err(|e| {
            let err = ServiceError::DatabaseError(e);
            if err.is_unique_violation() {
                ServiceError::Conflict(format!("a user with email {} already exists", email))
            } else {
                err
            }
        })
    }

    async fn list(&self) -> Result<Vec<UserModel>, ServiceError> {
        Ok(User::find()
            .order_by_asc(user::Column::CreatedAt)
            .all(self.base.get_db())
            .await?)
    }
}
