//! `docker-compose.yml`.

use super::{
    DATABASE_DIR, DATABASE_SERVICE, ENV_FILE_NAME, MACHINE_LEARNING_SERVICE,
    MICROSERVICES_SERVICE, MODEL_CACHE_VOLUME, REDIS_SERVICE, SERVER_SERVICE, upload_location,
    yaml_quote,
};
use crate::config::ProvisionConfig;
use crate::request::ProvisionRequest;
use crate::secret::GeneratedSecret;

const PROJECT_NAME: &str = "immich";

pub(super) fn render(
    request: &ProvisionRequest,
    secret: &GeneratedSecret,
    config: &ProvisionConfig,
) -> String {
    let internal = &config.network.internal;
    let external = &config.network.external;
    let images = &config.images;

    let upload = yaml_quote(&format!(
        "{}:/usr/src/app/upload",
        upload_location(request).display()
    ));
    let library = yaml_quote(&format!(
        "{}:/usr/src/app/library:ro",
        request.primary_storage_path.display()
    ));
    let external_library = yaml_quote(&format!(
        "{}:/usr/src/app/external:ro",
        request.external_storage_path.display()
    ));
    let database_data = yaml_quote(&format!(
        "{}:/var/lib/postgresql/data",
        request.install_path.join(DATABASE_DIR).display()
    ));
    let published = yaml_quote(&format!(
        "{}:{}",
        config.ports.host, config.ports.container
    ));
    let isolation = if config.network.isolate_internal {
        "\n    internal: true"
    } else {
        ""
    };

    format!(
        r#"name: {PROJECT_NAME}

services:
  {SERVER_SERVICE}:
    container_name: immich_server
    image: {server_image}
    command: ["start.sh", "immich"]
    volumes:
      - {upload}
      - {library}
      - {external_library}
      - "/etc/localtime:/etc/localtime:ro"
    env_file:
      - {ENV_FILE_NAME}
    ports:
      - {published}
    depends_on:
      - {REDIS_SERVICE}
      - {DATABASE_SERVICE}
    networks:
      - {internal}
      - {external}
    restart: always

  {MICROSERVICES_SERVICE}:
    container_name: immich_microservices
    image: {server_image}
    command: ["start.sh", "microservices"]
    volumes:
      - {upload}
      - {library}
      - {external_library}
      - "/etc/localtime:/etc/localtime:ro"
    env_file:
      - {ENV_FILE_NAME}
    depends_on:
      - {REDIS_SERVICE}
      - {DATABASE_SERVICE}
    networks:
      - {internal}
    restart: always

  {MACHINE_LEARNING_SERVICE}:
    container_name: immich_machine_learning
    image: {ml_image}
    volumes:
      - {MODEL_CACHE_VOLUME}:/cache
      - "/etc/localtime:/etc/localtime:ro"
    env_file:
      - {ENV_FILE_NAME}
    networks:
      - {internal}
    restart: always

  {REDIS_SERVICE}:
    container_name: immich_redis
    image: {redis_image}
    volumes:
      - "/etc/localtime:/etc/localtime:ro"
    networks:
      - {internal}
    restart: always

  {DATABASE_SERVICE}:
    container_name: immich_postgres
    image: {database_image}
    env_file:
      - {ENV_FILE_NAME}
    environment:
      POSTGRES_PASSWORD: {password}
      POSTGRES_USER: {db_user}
      POSTGRES_DB: {db_name}
    volumes:
      - {database_data}
      - "/etc/localtime:/etc/localtime:ro"
    networks:
      - {internal}
    restart: always

networks:
  {internal}:
    driver: bridge{isolation}
  {external}:
    driver: bridge

volumes:
  {MODEL_CACHE_VOLUME}:
"#,
        server_image = yaml_quote(&images.server),
        ml_image = yaml_quote(&images.machine_learning),
        redis_image = yaml_quote(&images.redis),
        database_image = yaml_quote(&images.database),
        password = yaml_quote(secret.expose()),
        db_user = yaml_quote(&config.database.username),
        db_name = yaml_quote(&config.database.name),
    )
}
