use argon2::Argon2;
use axum::{extract::State, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::Error,
    util::{DecimalString, PathObjectId},
};

use super::auth::{RegisterResponse, UserAccess, UserCollection, UserModel, UserRole, UserStatus};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IndexResponse {
    pub accounts: Vec<RegisterResponse>,
}

pub async fn index(
    State(collection): State<UserCollection>,
    user: UserAccess,
) -> Result<Json<IndexResponse>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Trucker => return Err(Error::Forbidden),
        UserRole::Admin | UserRole::Superadmin => {}
    }

    let mut cursor = collection.find_exists(None, None).await?;

    let mut accounts = vec![];

    while cursor.advance().await? {
        let account = cursor.deserialize_current()?;

        accounts.push(account.into());
    }

    Ok(Json(IndexResponse { accounts }))
}

pub async fn show(
    State(accounts): State<UserCollection>,
    user: UserAccess,
    PathObjectId(account_id): PathObjectId,
) -> Result<Json<RegisterResponse>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Trucker => return Err(Error::Forbidden),
        UserRole::Admin | UserRole::Superadmin => {}
    }

    let account = accounts
        .find_one(
            bson::doc! {
                "_id": account_id,
            },
            None,
        )
        .await?
        .ok_or(Error::NoResource)?;

    Ok(Json(account.into()))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct AccountRequest {
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,

    pub role: UserRole,

    #[serde(default)]
    pub accidents: i64,
    #[serde(default)]
    pub theft_complaints: i64,
    #[serde(default)]
    pub truck_age: i64,
    #[serde(default)]
    pub drivers_license_years: i64,

    pub balance: Option<DecimalString>,
}

pub async fn create(
    State(accounts): State<UserCollection>,
    State(argon): State<Argon2<'_>>,
    user: UserAccess,
    Json(request): Json<AccountRequest>,
) -> Result<Json<RegisterResponse>, Error> {
    match user.role {
        UserRole::Shipper | UserRole::Trucker => return Err(Error::Forbidden),
        UserRole::Admin | UserRole::Superadmin => {}
    }

    let insert = super::auth::create_user(
        accounts,
        argon,
        super::auth::CreateUserRequest {
            name: request.name,
            email: request.email,
            password: request.password,
            confirm_password: request.confirm_password,
            role: request.role,
            accidents: request.accidents,
            theft_complaints: request.theft_complaints,
            truck_age: request.truck_age,
            drivers_license_years: request.drivers_license_years,
            balance: request
                .balance
                .map(|it| it.0)
                .unwrap_or_else(|| Decimal::from(0)),
            // Admin-created accounts skip the verification flow.
            is_verified: true,
            status: UserStatus::Active,
        },
    )
    .await?;

    Ok(Json(insert.into()))
}

#[derive(Validate, Serialize, Deserialize)]
pub struct UpdateRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(min = 8, max = 64))]
    pub password: Option<String>,

    #[validate(must_match = "password")]
    #[serde(rename = "confirm_password")]
    pub _confirm_password: Option<String>,

    pub role: Option<UserRole>,

    pub accidents: Option<i64>,
    pub theft_complaints: Option<i64>,
    pub truck_age: Option<i64>,
    pub drivers_license_years: Option<i64>,

    pub balance: Option<DecimalString>,

    pub is_verified: Option<bool>,
    pub status: Option<UserStatus>,
}

pub async fn update(
    user: UserAccess,
    State(accounts): State<UserCollection>,
    State(argon): State<Argon2<'_>>,
    PathObjectId(account_id): PathObjectId,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<RegisterResponse>, Error> {
    request.validate()?;

    match user.role {
        UserRole::Shipper | UserRole::Trucker => return Err(Error::Forbidden),
        UserRole::Admin | UserRole::Superadmin => {}
    }

    let account = accounts
        .find_one(bson::doc! {"_id": account_id}, None)
        .await?
        .ok_or(Error::NoResource)?;

    if let Some(email) = &request.email {
        if email != &account.email {
            let count = accounts
                .count_documents(
                    bson::doc! {
                        "email": email
                    },
                    None,
                )
                .await?;

            if count > 0 {
                return Err(Error::MustUniqueError("email".to_string()));
            }
        }
    }

    let mut account = UserModel {
        id: account.id,
        name: request.name.unwrap_or(account.name),
        email: request.email.unwrap_or(account.email),
        password: request
            .password
            .map(|it| crate::util::hash_password(&argon, &it))
            .unwrap_or(Ok(account.password))?,
        role: request.role.unwrap_or(account.role),
        accidents: request.accidents.unwrap_or(account.accidents),
        theft_complaints: request.theft_complaints.unwrap_or(account.theft_complaints),
        truck_age: request.truck_age.unwrap_or(account.truck_age),
        drivers_license_years: request
            .drivers_license_years
            .unwrap_or(account.drivers_license_years),
        balance: request.balance.map(Into::into).unwrap_or(account.balance),
        benefits_eligible: account.benefits_eligible,
        is_verified: request.is_verified.unwrap_or(account.is_verified),
        status: request.status.unwrap_or(account.status),
        updated_at: OffsetDateTime::now_utc().into(),
        created_at: account.created_at,
    };
    account.refresh_benefits_eligible();

    accounts
        .update_exists_one_by_id(
            account_id,
            bson::doc! {
                "$set": bson::to_document(&account)?
            },
        )
        .await?;

    Ok(Json(account.into()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::Json;
    use bson::oid::ObjectId;
    use rust_decimal::Decimal;

    use crate::{
        api::v1::{auth::UserRole, tests::bootstrap},
        error::Error,
        util::PathObjectId,
    };

    fn trucker_request(email: &str, accidents: i64) -> super::AccountRequest {
        super::AccountRequest {
            name: "test".to_string(),
            email: email.to_string(),
            password: "password".to_string(),
            confirm_password: "password".to_string(),
            role: UserRole::Trucker,
            accidents,
            theft_complaints: 0,
            truck_age: 2,
            drivers_license_years: 10,
            balance: Some(Decimal::from(0).into()),
        }
    }

    #[tokio::test]
    async fn test_create_recomputes_benefits_eligibility() {
        let bootstrap = bootstrap().await;

        let Json(clean) = super::create(
            bootstrap.user_collection(),
            bootstrap.argon(),
            bootstrap.user_access(),
            Json(trucker_request("clean@test.com", 0)),
        )
        .await
        .unwrap();
        assert!(clean.benefits_eligible);

        let Json(dirty) = super::create(
            bootstrap.user_collection(),
            bootstrap.argon(),
            bootstrap.user_access(),
            Json(trucker_request("dirty@test.com", 2)),
        )
        .await
        .unwrap();
        assert!(!dirty.benefits_eligible);

        let Json(response) = super::index(bootstrap.user_collection(), bootstrap.user_access())
            .await
            .unwrap();
        assert_eq!(response.accounts.len(), 3);

        let _ = super::show(
            bootstrap.user_collection(),
            bootstrap.user_access(),
            PathObjectId(clean.id.0),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_update_keeps_benefits_eligibility_fresh() {
        let bootstrap = bootstrap().await;

        let Json(account) = super::create(
            bootstrap.user_collection(),
            bootstrap.argon(),
            bootstrap.user_access(),
            Json(trucker_request("trucker@test.com", 0)),
        )
        .await
        .unwrap();
        assert!(account.benefits_eligible);

        let Json(updated) = super::update(
            bootstrap.user_access(),
            bootstrap.user_collection(),
            bootstrap.argon(),
            PathObjectId(account.id.0),
            Json(super::UpdateRequest {
                name: None,
                email: None,
                password: None,
                _confirm_password: None,
                role: None,
                accidents: Some(1),
                theft_complaints: None,
                truck_age: None,
                drivers_license_years: None,
                balance: None,
                is_verified: None,
                status: None,
            }),
        )
        .await
        .unwrap();
        assert!(!updated.benefits_eligible);

        let stored = bootstrap
            .app_state
            .user_collection
            .find_one(bson::doc! { "_id": account.id.0 }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.benefits_eligible);
        assert_eq!(stored.accidents, 1);

        let Json(repaired) = super::update(
            bootstrap.user_access(),
            bootstrap.user_collection(),
            bootstrap.argon(),
            PathObjectId(account.id.0),
            Json(super::UpdateRequest {
                name: None,
                email: None,
                password: None,
                _confirm_password: None,
                role: None,
                accidents: Some(0),
                theft_complaints: None,
                truck_age: None,
                drivers_license_years: None,
                balance: None,
                is_verified: None,
                status: None,
            }),
        )
        .await
        .unwrap();
        assert!(repaired.benefits_eligible);
    }

    #[tokio::test]
    async fn test_unique_email_on_update() {
        let bootstrap = bootstrap().await;

        let Json(account) = super::create(
            bootstrap.user_collection(),
            bootstrap.argon(),
            bootstrap.user_access(),
            Json(trucker_request("trucker@test.com", 0)),
        )
        .await
        .unwrap();

        let error = super::update(
            bootstrap.user_access(),
            bootstrap.user_collection(),
            bootstrap.argon(),
            PathObjectId(account.id.0),
            Json(super::UpdateRequest {
                name: None,
                email: Some(bootstrap.user_email()),
                password: None,
                _confirm_password: None,
                role: None,
                accidents: None,
                theft_complaints: None,
                truck_age: None,
                drivers_license_years: None,
                balance: None,
                is_verified: None,
                status: None,
            }),
        )
        .await
        .expect_err("cannot take another account's email");
        assert_matches!(error, Error::MustUniqueError(string) if string == "email");
    }

    #[tokio::test]
    async fn test_noresource() {
        let bootstrap = bootstrap().await;

        let id = ObjectId::new();

        let error = super::show(
            bootstrap.user_collection(),
            bootstrap.user_access(),
            PathObjectId(id),
        )
        .await
        .expect_err("");
        assert_matches!(error, Error::NoResource);

        let error = super::update(
            bootstrap.user_access(),
            bootstrap.user_collection(),
            bootstrap.argon(),
            PathObjectId(id),
            Json(super::UpdateRequest {
                name: Some("test".to_string()),
                email: None,
                password: None,
                _confirm_password: None,
                role: None,
                accidents: None,
                theft_complaints: None,
                truck_age: None,
                drivers_license_years: None,
                balance: None,
                is_verified: None,
                status: None,
            }),
        )
        .await
        .expect_err("");
        assert_matches!(error, Error::NoResource);
    }

    #[tokio::test]
    async fn test_as_non_admin() {
        let bootstrap = bootstrap().await;
        let id = ObjectId::new();

        for (i, role) in [UserRole::Shipper, UserRole::Trucker]
            .into_iter()
            .enumerate()
        {
            let bootstrap = bootstrap
                .derive(&format!("user{i}@test.com"), "password", role)
                .await;

            let error = super::create(
                bootstrap.user_collection(),
                bootstrap.argon(),
                bootstrap.user_access(),
                Json(trucker_request("email@test.com", 0)),
            )
            .await
            .expect_err("can create as user");
            assert_matches!(error, Error::Forbidden);

            let error = super::index(bootstrap.user_collection(), bootstrap.user_access())
                .await
                .expect_err("can list as user");
            assert_matches!(error, Error::Forbidden);

            let error = super::update(
                bootstrap.user_access(),
                bootstrap.user_collection(),
                bootstrap.argon(),
                PathObjectId(id),
                Json(super::UpdateRequest {
                    name: Some("test".to_string()),
                    email: None,
                    password: None,
                    _confirm_password: None,
                    role: None,
                    accidents: None,
                    theft_complaints: None,
                    truck_age: None,
                    drivers_license_years: None,
                    balance: None,
                    is_verified: None,
                    status: None,
                }),
            )
            .await
            .expect_err("can update as user");
            assert_matches!(error, Error::Forbidden);
        }
    }
}
