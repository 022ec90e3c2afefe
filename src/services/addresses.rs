use crate::{
    db::DbPool,
    entities::address::{self, Entity as AddressEntity, Model as AddressModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::shipping::normalize_zip,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateAddressRequest {
    pub label: Option<String>,
    #[validate(length(min = 1, message = "Recipient is required"))]
    pub recipient: String,
    #[validate(length(min = 1, message = "Street is required"))]
    pub street: String,
    #[validate(length(min = 1, message = "Number is required"))]
    pub number: String,
    pub complement: Option<String>,
    #[validate(length(min = 1, message = "District is required"))]
    pub district: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    #[validate(length(equal = 2, message = "State must be a 2-letter UF"))]
    pub state: String,
    #[validate(length(min = 1, message = "Zip code is required"))]
    pub zip_code: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateAddressRequest {
    pub label: Option<String>,
    pub recipient: Option<String>,
    pub street: Option<String>,
    pub number: Option<String>,
    pub complement: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub phone: Option<String>,
}

/// Address book operations. Exactly one address per user carries
/// `is_default`; every path that can change that clears siblings inside the
/// same transaction.
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl AddressService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Load an address enforcing ownership: unknown ids are 404, someone
    /// else's address is 403.
    pub async fn get_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<AddressModel, ServiceError> {
        let address = AddressEntity::find_by_id(address_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;

        if address.user_id != user_id {
            warn!(%address_id, %user_id, "Cross-tenant address access denied");
            return Err(ServiceError::Forbidden(
                "address does not belong to the caller".to_string(),
            ));
        }

        Ok(address)
    }

    /// All addresses of a user, default first, then newest.
    #[instrument(skip(self))]
    pub async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<AddressModel>, ServiceError> {
        let addresses = AddressEntity::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_desc(address::Column::IsDefault)
            .order_by_desc(address::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(addresses)
    }

    /// Create an address. The first address of a user always becomes the
    /// default; an explicit `is_default` displaces the current one.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn create_address(
        &self,
        user_id: Uuid,
        request: CreateAddressRequest,
    ) -> Result<AddressModel, ServiceError> {
        request.validate()?;
        let zip_code = normalize_zip(&request.zip_code)?;

        let txn = self.db.begin().await?;

        let existing = AddressEntity::find()
            .filter(address::Column::UserId.eq(user_id))
            .all(&txn)
            .await?;
        let make_default = request.is_default || existing.is_empty();

        if make_default {
            Self::clear_defaults(&txn, user_id).await?;
        }

        let now = Utc::now();
        let address_id = Uuid::new_v4();
        let model = address::ActiveModel {
            id: Set(address_id),
            user_id: Set(user_id),
            label: Set(request.label),
            recipient: Set(request.recipient),
            street: Set(request.street),
            number: Set(request.number),
            complement: Set(request.complement),
            district: Set(request.district),
            city: Set(request.city),
            state: Set(request.state.to_uppercase()),
            zip_code: Set(zip_code),
            phone: Set(request.phone),
            is_default: Set(make_default),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let created = model.insert(&txn).await?;
        txn.commit().await?;

        info!(%address_id, is_default = make_default, "Address created");
        if make_default {
            self.event_sender
                .send_logged(Event::DefaultAddressChanged {
                    user_id,
                    address_id,
                })
                .await;
        }

        Ok(created)
    }

    /// Partial update; the default flag is managed by [`set_default`](Self::set_default).
    #[instrument(skip(self, request), fields(user_id = %user_id, address_id = %address_id))]
    pub async fn update_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        request: UpdateAddressRequest,
    ) -> Result<AddressModel, ServiceError> {
        request.validate()?;
        let address = self.get_address(user_id, address_id).await?;

        let mut active: address::ActiveModel = address.into();
        if let Some(label) = request.label {
            active.label = Set(Some(label));
        }
        if let Some(recipient) = request.recipient {
            active.recipient = Set(recipient);
        }
        if let Some(street) = request.street {
            active.street = Set(street);
        }
        if let Some(number) = request.number {
            active.number = Set(number);
        }
        if let Some(complement) = request.complement {
            active.complement = Set(Some(complement));
        }
        if let Some(district) = request.district {
            active.district = Set(district);
        }
        if let Some(city) = request.city {
            active.city = Set(city);
        }
        if let Some(state) = request.state {
            active.state = Set(state.to_uppercase());
        }
        if let Some(zip_code) = request.zip_code {
            active.zip_code = Set(normalize_zip(&zip_code)?);
        }
        if let Some(phone) = request.phone {
            active.phone = Set(Some(phone));
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(&*self.db).await?;
        Ok(updated)
    }

    /// Make this address the user's default, clearing the previous one in
    /// the same transaction.
    #[instrument(skip(self), fields(user_id = %user_id, address_id = %address_id))]
    pub async fn set_default(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<AddressModel, ServiceError> {
        let address = self.get_address(user_id, address_id).await?;

        let txn = self.db.begin().await?;
        Self::clear_defaults(&txn, user_id).await?;

        let mut active: address::ActiveModel = address.into();
        active.is_default = Set(true);
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_logged(Event::DefaultAddressChanged {
                user_id,
                address_id,
            })
            .await;
        Ok(updated)
    }

    /// Delete an address. When the default goes away the most recently
    /// created remaining address is promoted, keeping the invariant.
    #[instrument(skip(self), fields(user_id = %user_id, address_id = %address_id))]
    pub async fn delete_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<(), ServiceError> {
        let address = self.get_address(user_id, address_id).await?;
        let was_default = address.is_default;

        let txn = self.db.begin().await?;
        AddressEntity::delete_by_id(address_id).exec(&txn).await?;

        let mut promoted: Option<Uuid> = None;
        if was_default {
            let heir = AddressEntity::find()
                .filter(address::Column::UserId.eq(user_id))
                .order_by_desc(address::Column::CreatedAt)
                .one(&txn)
                .await?;
            if let Some(heir) = heir {
                let heir_id = heir.id;
                let mut active: address::ActiveModel = heir.into();
                active.is_default = Set(true);
                active.updated_at = Set(Some(Utc::now()));
                active.update(&txn).await?;
                promoted = Some(heir_id);
            }
        }

        txn.commit().await?;

        info!(%address_id, was_default, "Address deleted");
        if let Some(heir_id) = promoted {
            self.event_sender
                .send_logged(Event::DefaultAddressChanged {
                    user_id,
                    address_id: heir_id,
                })
                .await;
        }

        Ok(())
    }

    async fn clear_defaults<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<(), ServiceError> {
        AddressEntity::update_many()
            .col_expr(address::Column::IsDefault, sea_orm::sea_query::Expr::value(false))
            .filter(address::Column::UserId.eq(user_id))
            .filter(address::Column::IsDefault.eq(true))
            .exec(conn)
            .await?;
        Ok(())
    }
}
