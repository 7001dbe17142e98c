use argon2::Argon2;
use axum::{
    extract::{FromRef, FromRequestParts, State},
    headers::{authorization::Bearer, Authorization, Cookie, Header, SetCookie},
    http::{request::Parts, HeaderValue},
    Json, RequestPartsExt, TypedHeader,
};
use bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use time::OffsetDateTime;
use validator::Validate;

use crate::{
    error::{Error, UnauthorizedType},
    mongo_ext::Collection,
    util::{hash_password, verify_password, DecimalString, FormattedDateTime, ObjectIdString},
};

use super::token::{
    create_refresh_token, decode_access_token, decode_refresh_token, generate_access_token,
    JwtState, RefreshTokenClaims, RefreshTokenCollection,
};

#[derive(Clone)]
pub struct UserCollection(pub Collection<UserModel>);

impl std::ops::Deref for UserCollection {
    type Target = Collection<UserModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub name: String,
    pub email: String,
    pub password: String,
    pub role: UserRole,

    // Trucker safety and experience profile. Absent fields read as 0.
    #[serde(default)]
    pub accidents: i64,
    #[serde(default)]
    pub theft_complaints: i64,
    #[serde(default)]
    pub truck_age: i64,
    #[serde(default)]
    pub drivers_license_years: i64,

    #[serde(default)]
    pub balance: Decimal,

    // Cached result of `is_eligible`, maintained on every trucker write.
    #[serde(default)]
    pub benefits_eligible: bool,

    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub status: UserStatus,

    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Shipper,
    #[default]
    Trucker,
    Admin,
    Superadmin,
}

impl UserRole {
    pub fn is_admin(self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Superadmin)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    #[default]
    Pending,
}

impl UserModel {
    /// Global trucker eligibility: clean safety record, truck at most five
    /// years old, at least five years licensed.
    pub fn is_eligible(&self) -> bool {
        self.accidents == 0
            && self.theft_complaints == 0
            && self.truck_age <= 5
            && self.drivers_license_years >= 5
    }

    /// Recompute the cached benefits flag from the current profile. Only
    /// truckers ever hold `true`. Must be called on every write that can
    /// touch the profile fields.
    pub fn refresh_benefits_eligible(&mut self) {
        self.benefits_eligible = matches!(self.role, UserRole::Trucker) && self.is_eligible();
    }

    pub async fn from_id(
        id: ObjectId,
        UserCollection(users): &UserCollection,
    ) -> Result<Self, Error> {
        users
            .find_one(
                bson::doc! {
                    "_id": id
                },
                None,
            )
            .await?
            .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))
    }
}

#[derive(Debug)]
pub struct UserAccess {
    pub id: ObjectId,
    pub role: UserRole,
}

impl UserAccess {
    pub fn from_token(jwt_state: &JwtState, token: &str) -> Result<Self, Error> {
        let token = decode_access_token(jwt_state, token)?;

        if token.claims.is_expired() {
            return Err(Error::Unauthorized(UnauthorizedType::InvalidAccessToken));
        }

        Ok(Self {
            id: token.claims.sub.0,
            role: token.claims.user_role,
        })
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserAccess
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(token)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidAccessToken))?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, token.token())
    }
}

#[derive(Debug)]
pub struct RefreshToken(String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshToken {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let cookie = parts
            .extract::<TypedHeader<Cookie>>()
            .await
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("cookie not found"))?;

        let refresh_token = cookie
            .get("refresh_token")
            .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))
            .tap_err(|_| tracing::debug!("token not found"))?;

        Ok(Self(refresh_token.to_string()))
    }
}

#[derive(Debug)]
pub struct RefreshClaim(pub RefreshTokenClaims, pub String);

impl RefreshClaim {
    pub fn from_token(jwt_state: &JwtState, refresh_token: String) -> Result<Self, Error> {
        let token = decode_refresh_token(jwt_state, &refresh_token)
            .map_err(|_| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

        Ok(Self(token.claims, refresh_token))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RefreshClaim
where
    JwtState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let RefreshToken(refresh_token) = parts.extract::<RefreshToken>().await?;

        let jwt = JwtState::from_ref(state);

        Self::from_token(&jwt, refresh_token)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserModel
where
    JwtState: FromRef<S>,
    UserCollection: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Error;
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let access = parts.extract_with_state::<UserAccess, _>(state).await?;
        let users = UserCollection::from_ref(state);
        Self::from_id(access.id, &users).await
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,

    #[serde(default)]
    pub role: UserRole,

    #[serde(default)]
    pub accidents: i64,
    #[serde(default)]
    pub theft_complaints: i64,
    #[serde(default)]
    pub truck_age: i64,
    #[serde(default)]
    pub drivers_license_years: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegisterResponse {
    pub id: ObjectIdString,

    pub name: String,
    pub email: String,
    pub role: UserRole,

    pub accidents: i64,
    pub theft_complaints: i64,
    pub truck_age: i64,
    pub drivers_license_years: i64,

    pub balance: DecimalString,
    pub benefits_eligible: bool,

    pub is_verified: bool,
    pub status: UserStatus,

    pub created_at: FormattedDateTime,
    pub updated_at: FormattedDateTime,
}

impl From<UserModel> for RegisterResponse {
    fn from(value: UserModel) -> Self {
        Self {
            id: value.id.into(),
            name: value.name,
            email: value.email,
            role: value.role,

            accidents: value.accidents,
            theft_complaints: value.theft_complaints,
            truck_age: value.truck_age,
            drivers_license_years: value.drivers_license_years,

            balance: value.balance.into(),
            benefits_eligible: value.benefits_eligible,

            is_verified: value.is_verified,
            status: value.status,

            created_at: value.created_at.into(),
            updated_at: value.updated_at.into(),
        }
    }
}

#[derive(Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 124))]
    pub name: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 8, max = 64))]
    pub password: String,

    #[validate(must_match = "password")]
    pub confirm_password: String,

    pub role: UserRole,

    pub accidents: i64,
    pub theft_complaints: i64,
    pub truck_age: i64,
    pub drivers_license_years: i64,

    pub balance: Decimal,

    pub is_verified: bool,
    pub status: UserStatus,
}

pub async fn create_user(
    users: UserCollection,
    argon: Argon2<'_>,
    request: CreateUserRequest,
) -> Result<UserModel, Error> {
    request.validate()?;
    let count = users
        .count_documents(
            bson::doc! {
                "email": &request.email
            },
            None,
        )
        .await?;

    if count > 0 {
        return Err(Error::MustUniqueError("email".to_string()));
    }

    let mut model = UserModel {
        id: ObjectId::new(),
        name: request.name,
        email: request.email,
        password: hash_password(&argon, &request.password)?,
        role: request.role,
        accidents: request.accidents,
        theft_complaints: request.theft_complaints,
        truck_age: request.truck_age,
        drivers_license_years: request.drivers_license_years,
        balance: request.balance,
        benefits_eligible: false,
        is_verified: request.is_verified,
        status: request.status,
        created_at: OffsetDateTime::now_utc().into(),
        updated_at: OffsetDateTime::now_utc().into(),
    };
    model.refresh_benefits_eligible();

    users.insert_one(&model, None).await?;

    Ok(model)
}

pub async fn register(
    State(users): State<UserCollection>,
    State(argon): State<Argon2<'_>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, Error> {
    match request.role {
        UserRole::Shipper | UserRole::Trucker => {}
        UserRole::Admin | UserRole::Superadmin => {
            return Err(Error::Forbidden)
                .tap_err(|_| tracing::debug!("tried registering an admin account"))
        }
    }

    create_user(
        users,
        argon,
        CreateUserRequest {
            name: request.name,
            email: request.email,
            password: request.password,
            confirm_password: request.confirm_password,
            role: request.role,
            accidents: request.accidents,
            theft_complaints: request.theft_complaints,
            truck_age: request.truck_age,
            drivers_license_years: request.drivers_license_years,
            balance: Decimal::from(0),
            is_verified: false,
            status: UserStatus::Pending,
        },
    )
    .await
    .map(|it| Json(it.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginResponse {
    pub refresh_token: String,
    pub access_token: String,
}

pub async fn login(
    State(users): State<UserCollection>,
    State(refresh_tokens): State<RefreshTokenCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    Json(request): Json<LoginRequest>,
) -> Result<(TypedHeader<SetCookie>, Json<LoginResponse>), Error> {
    let user = users
        .find_one(
            bson::doc! {
                "email": &request.email
            },
            None,
        )
        .await?;

    let user = match user {
        Some(user) if verify_password(&argon, &request.password, &user.password) => user,
        _ => {
            return Err(Error::Unauthorized(
                UnauthorizedType::WrongUsernameOrPassword,
            ))
        }
    };

    let refresh_token = create_refresh_token(&jwt_state, &argon, refresh_tokens, &user).await?;
    let access_token = generate_access_token(&jwt_state, &user)?;

    let header = TypedHeader(
        SetCookie::decode(
            &mut [HeaderValue::from_str(&format!(
                "refresh_token={}; HttpOnly; Path=/",
                refresh_token
            ))
            .unwrap()]
            .as_slice()
            .iter(),
        )
        .unwrap(),
    );

    Ok((
        header,
        Json(LoginResponse {
            refresh_token,
            access_token: access_token.token,
        }),
    ))
}

pub async fn logout(
    State(refresh_tokens): State<RefreshTokenCollection>,
    RefreshClaim(claim, _): RefreshClaim,
) -> Result<(), Error> {
    let _m = refresh_tokens
        .find_one(bson::doc! { "_id": claim.sub }, None)
        .await?
        .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    refresh_tokens
        .delete_one(bson::doc! { "_id": claim.sub }, None)
        .await?;

    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshAccessTokenResponse {
    pub access_token: String,
    pub expired_at: FormattedDateTime,
}

pub async fn refresh_access_token(
    State(users): State<UserCollection>,
    State(refresh_tokens): State<RefreshTokenCollection>,
    State(jwt_state): State<JwtState>,
    State(argon): State<Argon2<'static>>,
    RefreshClaim(claim, refresh_token): RefreshClaim,
) -> Result<Json<RefreshAccessTokenResponse>, Error> {
    let model = refresh_tokens
        .find_one(bson::doc! { "_id": claim.sub }, None)
        .await?
        .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    if !verify_password(&argon, &refresh_token, &model.token) {
        refresh_tokens
            .delete_one(bson::doc! { "_id": claim.sub }, None)
            .await?;
    }

    let user = users
        .find_one(bson::doc! { "_id": claim.user_id }, None)
        .await?
        .ok_or_else(|| Error::Unauthorized(UnauthorizedType::InvalidRefreshToken))?;

    let access_token = generate_access_token(&jwt_state, &user)?;

    Ok(Json(RefreshAccessTokenResponse {
        access_token: access_token.token,
        expired_at: access_token.expired_at.into(),
    }))
}

pub async fn profile(user: UserModel) -> Json<RegisterResponse> {
    Json(user.into())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{extract::FromRequestParts, Json};
    use bson::oid::ObjectId;
    use rust_decimal::Decimal;

    use crate::{
        api::v1::tests::bootstrap,
        error::{Error, UnauthorizedType},
    };

    use super::{UserModel, UserRole, UserStatus};

    fn trucker(
        accidents: i64,
        theft_complaints: i64,
        truck_age: i64,
        drivers_license_years: i64,
    ) -> UserModel {
        UserModel {
            id: ObjectId::new(),
            name: "trucker".to_string(),
            email: "trucker@example.com".to_string(),
            password: "".to_string(),
            role: UserRole::Trucker,
            accidents,
            theft_complaints,
            truck_age,
            drivers_license_years,
            balance: Decimal::from(0),
            benefits_eligible: false,
            is_verified: false,
            status: UserStatus::Pending,
            created_at: bson::DateTime::now(),
            updated_at: bson::DateTime::now(),
        }
    }

    #[test]
    fn test_eligibility_policy() {
        assert!(trucker(0, 0, 5, 5).is_eligible());
        assert!(trucker(0, 0, 0, 40).is_eligible());

        // each criterion rules the trucker out on its own
        assert!(!trucker(1, 0, 5, 5).is_eligible());
        assert!(!trucker(0, 1, 5, 5).is_eligible());
        assert!(!trucker(0, 0, 6, 5).is_eligible());
        assert!(!trucker(0, 0, 5, 4).is_eligible());

        // a fresh profile defaults to zeroes and fails on experience
        assert!(!trucker(0, 0, 0, 0).is_eligible());
    }

    #[test]
    fn test_refresh_benefits_eligible_only_for_truckers() {
        let mut user = trucker(0, 0, 2, 10);
        user.refresh_benefits_eligible();
        assert!(user.benefits_eligible);

        user.role = UserRole::Shipper;
        user.refresh_benefits_eligible();
        assert!(!user.benefits_eligible);

        user.role = UserRole::Trucker;
        user.accidents = 2;
        user.refresh_benefits_eligible();
        assert!(!user.benefits_eligible);
    }

    #[tokio::test]
    async fn test_register_trucker_snapshots_benefits_eligibility() {
        let bootstrap = bootstrap().await;

        let Json(user) = super::register(
            bootstrap.user_collection(),
            bootstrap.argon(),
            Json(super::RegisterRequest {
                name: "clean record".to_string(),
                email: "clean@example.com".to_string(),
                password: "password".to_string(),
                confirm_password: "password".to_string(),
                role: UserRole::Trucker,
                accidents: 0,
                theft_complaints: 0,
                truck_age: 2,
                drivers_license_years: 8,
            }),
        )
        .await
        .unwrap();

        assert!(user.benefits_eligible);

        let Json(user) = super::register(
            bootstrap.user_collection(),
            bootstrap.argon(),
            Json(super::RegisterRequest {
                name: "newcomer".to_string(),
                email: "newcomer@example.com".to_string(),
                password: "password".to_string(),
                confirm_password: "password".to_string(),
                role: UserRole::Trucker,
                accidents: 0,
                theft_complaints: 0,
                truck_age: 0,
                drivers_license_years: 0,
            }),
        )
        .await
        .unwrap();

        assert!(!user.benefits_eligible);
    }

    #[tokio::test]
    async fn test_register_rejects_admin_roles() {
        let bootstrap = bootstrap().await;

        for role in [UserRole::Admin, UserRole::Superadmin] {
            let err = super::register(
                bootstrap.user_collection(),
                bootstrap.argon(),
                Json(super::RegisterRequest {
                    name: "name".to_string(),
                    email: "admin@example.com".to_string(),
                    password: "password".to_string(),
                    confirm_password: "password".to_string(),
                    role,
                    accidents: 0,
                    theft_complaints: 0,
                    truck_age: 0,
                    drivers_license_years: 0,
                }),
            )
            .await
            .unwrap_err();
            assert_matches!(err, Error::Forbidden);
        }
    }

    #[tokio::test]
    async fn test_login() {
        let bootstrap = bootstrap().await;

        let _ = super::register(
            bootstrap.user_collection(),
            bootstrap.argon(),
            Json(super::RegisterRequest {
                name: "name".to_string(),
                email: "email@test.com".to_string(),
                password: "password".to_string(),
                confirm_password: "password".to_string(),
                role: UserRole::Shipper,
                accidents: 0,
                theft_complaints: 0,
                truck_age: 0,
                drivers_license_years: 0,
            }),
        )
        .await
        .unwrap();

        let (_, Json(user)) = super::login(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                email: "email@test.com".to_string(),
                password: "password".to_string(),
            }),
        )
        .await
        .unwrap();

        let _token = super::refresh_access_token(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            super::RefreshClaim::from_token(
                &bootstrap.app_state.jwt_state,
                user.refresh_token.clone(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

        let err = super::login(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                email: "email@test.com".to_string(),
                password: "wrongpassword".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::WrongUsernameOrPassword)
        );

        let err = super::login(
            bootstrap.user_collection(),
            bootstrap.refresh_token_collection(),
            bootstrap.jwt_state(),
            bootstrap.argon(),
            Json(super::LoginRequest {
                email: "wrongemail@test.com".to_string(),
                password: "wrongpassword".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::WrongUsernameOrPassword)
        );
    }

    #[tokio::test]
    async fn test_logout() {
        let bootstrap = bootstrap().await;

        let refresh_token = bootstrap.user_refresh_token().await;

        let _ = super::logout(
            bootstrap.refresh_token_collection(),
            super::RefreshClaim::from_token(&bootstrap.app_state.jwt_state, refresh_token.clone())
                .unwrap(),
        )
        .await
        .unwrap();

        let err = super::logout(
            bootstrap.refresh_token_collection(),
            super::RefreshClaim::from_token(&bootstrap.app_state.jwt_state, refresh_token).unwrap(),
        )
        .await
        .unwrap_err();

        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::InvalidRefreshToken)
        );
    }

    #[tokio::test]
    async fn test_unique_email() {
        let bootstrap = bootstrap().await;

        let request = super::RegisterRequest {
            name: "name".to_string(),
            email: "email@gmail.com".to_string(),
            password: "password".to_string(),
            confirm_password: "password".to_string(),
            role: UserRole::Trucker,
            accidents: 0,
            theft_complaints: 0,
            truck_age: 0,
            drivers_license_years: 0,
        };

        let _ = super::register(
            bootstrap.user_collection(),
            bootstrap.argon(),
            Json(request.clone()),
        )
        .await
        .unwrap();

        let err = super::register(
            bootstrap.user_collection(),
            bootstrap.argon(),
            Json(request),
        )
        .await
        .expect_err("");
        assert_matches!(err, Error::MustUniqueError(_))
    }

    #[tokio::test]
    pub async fn test_user_access() {
        let bootstrap = bootstrap().await;

        let (mut parts, _) = axum::http::request::Request::get("http://localhost")
            .header(
                "Authorization",
                format!("Bearer {}", bootstrap.user_token()),
            )
            .body(())
            .unwrap()
            .into_parts();

        let user = super::UserAccess::from_request_parts(&mut parts, &bootstrap.app_state)
            .await
            .unwrap();

        assert_eq!(user.id, bootstrap.user_id());
    }

    #[tokio::test]
    pub async fn test_user_access_expired_token() {
        let bootstrap = bootstrap().await;

        let (mut parts, _) = axum::http::request::Request::get("http://localhost")
            .header(
                "Authorization",
                format!(
                    "Bearer {}",
                    super::super::token::generate_access_token_with_exp(
                        &bootstrap.app_state.jwt_state,
                        &bootstrap.user_model,
                        0
                    )
                    .unwrap()
                ),
            )
            .body(())
            .unwrap()
            .into_parts();

        let err = super::UserAccess::from_request_parts(&mut parts, &bootstrap.app_state)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Unauthorized(UnauthorizedType::InvalidAccessToken)
        );
    }
}
