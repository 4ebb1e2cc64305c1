use super::*;
use axum::http::Request;
use jsonwebtoken::{EncodingKey, Header, encode};

const SECRET: &str = "supersecretjwtsecretforunittesting123";
const USER_ID: &str = "123e4567-e89b-12d3-a456-426614174000";

fn token(secret: &str, sub: &str, exp: usize) -> String {
    encode(
        &Header::default(),
        &UserClaims {
            sub: sub.to_string(),
            exp,
        },
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

async fn extract(request: Request<()>) -> Result<AuthUser, AppError> {
    let keys = Arc::new(JwtKeys::new(SECRET));
    let (mut parts, _) = request.into_parts();
    AuthUser::from_request_parts(&mut parts, &keys).await
}

#[test]
fn validates_a_well_signed_token() {
    let keys = JwtKeys::new(SECRET);
    let claims = keys.validate(&token(SECRET, USER_ID, 9_999_999_999)).unwrap();
    assert_eq!(claims.sub, USER_ID);
}

#[test]
fn rejects_an_expired_token() {
    let keys = JwtKeys::new(SECRET);
    assert!(keys.validate(&token(SECRET, USER_ID, 1)).is_err());
}

#[test]
fn rejects_a_token_signed_with_another_secret() {
    let keys = JwtKeys::new(SECRET);
    assert!(keys.validate(&token("wrongsecret", USER_ID, 9_999_999_999)).is_err());
}

#[tokio::test]
async fn extracts_the_user_from_the_authorization_header() {
    let request = Request::builder()
        .header(
            AUTHORIZATION,
            format!("Bearer {}", token(SECRET, USER_ID, 9_999_999_999)),
        )
        .body(())
        .unwrap();

    let user = extract(request).await.unwrap();
    assert_eq!(user.user_id, Uuid::parse_str(USER_ID).unwrap());
}

#[tokio::test]
async fn falls_back_to_the_query_token() {
    let request = Request::builder()
        .uri(format!(
            "/api/v1/live?access_token={}",
            token(SECRET, USER_ID, 9_999_999_999)
        ))
        .body(())
        .unwrap();

    assert!(extract(request).await.is_ok());
}

#[tokio::test]
async fn missing_token_or_non_uuid_subject_is_unauthorized() {
    let anonymous = Request::builder().body(()).unwrap();
    assert!(matches!(extract(anonymous).await, Err(AppError::Unauthorized)));

    let odd_subject = Request::builder()
        .header(
            AUTHORIZATION,
            format!("Bearer {}", token(SECRET, "service-account", 9_999_999_999)),
        )
        .body(())
        .unwrap();
    assert!(matches!(extract(odd_subject).await, Err(AppError::Unauthorized)));
}
